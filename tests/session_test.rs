use shellexpect::testing::{MockShell, ScriptedChannel};
use shellexpect::{Error, ExpectOutcome, LocalShell, Screen, Session, SessionConfig, Shell, Target};
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(10);

#[test]
fn test_printable_ascii_renders_verbatim() {
    let text = "The quick brown fox jumps over the lazy dog 0123456789 !#%&()*+,-./:;<=>?@[]^_{|}~";
    let mut screen = Screen::new(200, 5);
    screen.feed(text.as_bytes());
    assert_eq!(screen.render(), text);
}

#[test]
fn test_wrap_at_width() {
    let mut screen = Screen::new(10, 3);
    screen.feed(b"0123456789X");
    assert_eq!(screen.render(), "0123456789\nX");
}

#[test]
fn test_overwrite_after_cursor_move() {
    let mut screen = Screen::new(20, 3);
    screen.feed(b"old text\x1b[1;1Hnew");
    assert_eq!(screen.render(), "new text");
    screen.feed(b"\r\x1b[Kdone");
    assert_eq!(screen.render(), "done");
}

#[tokio::test]
async fn test_eof_on_channel_closed_without_output() {
    let shell = MockShell::new().on("true", || ScriptedChannel::new().close());
    let mut session = shell.interact("true").await.unwrap();
    let started = Instant::now();
    let outcome = session.expect(&[Target::Eof], TIMEOUT).await.unwrap();
    assert_eq!(outcome.index(), Some(0));
    assert!(started.elapsed() < TIMEOUT);
}

#[tokio::test]
async fn test_literal_then_no_match() {
    let script = || ScriptedChannel::new().data("xx foo yy").close();
    let shell = MockShell::new().on("emit", script);

    let mut session = shell.interact("emit").await.unwrap();
    let outcome = session.expect(&["foo".into()], TIMEOUT).await.unwrap();
    assert_eq!(outcome.index(), Some(0));

    let mut session = shell.interact("emit").await.unwrap();
    let outcome = session.expect(&["bar".into()], TIMEOUT).await.unwrap();
    assert_eq!(outcome, ExpectOutcome::Ended);
}

#[tokio::test]
async fn test_list_order_wins_over_position() {
    let channel = ScriptedChannel::new().data("a comes before b").stall();
    let mut session = Session::new(Box::new(channel), SessionConfig::default());
    let outcome = session
        .expect(&["b".into(), "a".into()], TIMEOUT)
        .await
        .unwrap();
    assert_eq!(outcome.index(), Some(0));
}

#[tokio::test]
async fn test_timeout_when_nothing_matches() {
    let channel = ScriptedChannel::new().data("still working...").stall();
    let mut session = Session::new(Box::new(channel), SessionConfig::default());
    let started = Instant::now();
    let outcome = session
        .expect(&["finished".into()], Duration::from_millis(300))
        .await
        .unwrap();
    assert_eq!(outcome, ExpectOutcome::TimedOut);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_secs(3), "took {elapsed:?}");

    // A timeout is recoverable: the session stays usable.
    let outcome = session
        .expect(&["working".into()], Duration::from_millis(300))
        .await
        .unwrap();
    assert_eq!(outcome.index(), Some(0));
}

#[tokio::test]
async fn test_empty_target_list() {
    let mut session = Session::new(Box::new(ScriptedChannel::new()), SessionConfig::default());
    assert!(matches!(
        session.expect(&[], TIMEOUT).await,
        Err(Error::InvalidArgument(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_local_and_remote_sessions_run_concurrently() {
    let remote = MockShell::new().on("echo hello", || {
        ScriptedChannel::new()
            .delay(Duration::from_millis(50))
            .data("hello\n")
            .close()
            .exit_with(0)
    });
    let mut remote_session = remote.interact("echo hello").await.unwrap();
    let mut local_session = LocalShell::new().interact("echo hello").await.unwrap();

    let local = tokio::spawn(async move {
        let index = local_session.expect_index(&["hello".into()], TIMEOUT).await?;
        Ok::<_, Error>((index, local_session.transcript()))
    });
    let remote = tokio::spawn(async move {
        let index = remote_session.expect_index(&["hello".into()], TIMEOUT).await?;
        Ok::<_, Error>((index, remote_session.transcript()))
    });

    let (local_index, local_transcript) = local.await.unwrap().unwrap();
    let (remote_index, remote_transcript) = remote.await.unwrap().unwrap();
    assert_eq!(local_index, 0);
    assert_eq!(remote_index, 0);
    assert_eq!(local_transcript.matches("hello").count(), 1);
    assert_eq!(remote_transcript, "hello");
}

#[tokio::test]
async fn test_abort_from_another_task() {
    let channel = ScriptedChannel::new().stall();
    let mut session = Session::new(Box::new(channel), SessionConfig::default());
    let abort = session.abort_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        abort.abort();
    });
    let err = session.expect(&["never".into()], TIMEOUT).await.unwrap_err();
    assert!(matches!(err, Error::Channel(_)));
    assert!(matches!(session.send_line("late"), Err(Error::Channel(_))));
}

#[tokio::test]
async fn test_output_handler_and_unclaimed() {
    let channel = ScriptedChannel::new()
        .data("step 1 ok\r\nstep 2 ok\r\n")
        .close()
        .exit_with(0);
    let mut session = Session::new(Box::new(channel), SessionConfig::default());
    let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = seen.clone();
    session.on_output(move |data| sink.lock().unwrap().extend_from_slice(data));

    assert_eq!(session.expect_index(&["ok".into()], TIMEOUT).await.unwrap(), 0);
    assert_eq!(session.unclaimed(), "\nstep 2 ok");
    assert_eq!(session.expect_index(&["ok".into()], TIMEOUT).await.unwrap(), 0);
    assert!(matches!(
        session.expect_index(&["ok".into()], TIMEOUT).await,
        Err(Error::UnexpectedEof)
    ));
    assert_eq!(&*seen.lock().unwrap(), b"step 1 ok\r\nstep 2 ok\r\n");
    assert!(session.exit_status_ready());
}
