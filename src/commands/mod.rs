mod expect;
mod key_press;
mod send_input;
mod show;
mod type_text;
mod wait;

pub use expect::Expect;
pub use key_press::KeyPress;
pub use send_input::SendInput;
pub use show::Show;
pub use type_text::TypeText;
pub use wait::Wait;
