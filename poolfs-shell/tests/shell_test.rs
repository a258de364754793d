use poolfs::FileSystem;
use poolfs_shell::{image, Flow, Session};

fn run(session: &mut Session, script: &[&str]) -> Vec<String> {
    script
        .iter()
        .map(|line| session.handle_line(line).0)
        .collect()
}

#[test]
fn session_survives_a_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("storage.json");

    let mut session = Session::new(FileSystem::default());
    run(
        &mut session,
        &[
            "mkdir docs",
            "cd docs",
            "touch notes",
            "open notes w",
            "wf notes hello world",
            "mwf notes 0 5 6",
            "cd ..",
        ],
    );
    assert_eq!(session.handle_line("exit").1, Flow::Exit);
    image::save(&path, session.fs()).unwrap();

    let fs = image::load(&path).unwrap().unwrap();
    let mut session = Session::new(fs);
    let out = run(
        &mut session,
        &["cd docs", "cat notes", "open notes r", "cat notes", "rf notes 6 5"],
    );
    assert_eq!(out[1], "notes is not open in read mode\n");
    assert_eq!(out[3], "hello hello\n");
    assert_eq!(out[4], "hello\n");
    assert_eq!(session.prompt(), "/docs> ");
}

#[test]
fn out_of_memory_is_reported_and_state_kept() {
    let mut session = Session::new(FileSystem::default());
    let oversized = format!("wf big {}", "x".repeat(65));
    let out = run(
        &mut session,
        &[
            "touch big",
            "open big w",
            "wf big short",
            &oversized,
            "df",
            "cat big",
        ],
    );
    assert!(out[3].contains("64"), "unexpected reply: {}", out[3]);
    assert_eq!(out[4], "1019 of 1024 bytes free\n");
    assert_eq!(out[5], "short\n");
}

#[test]
fn moving_into_a_directory_keeps_contents() {
    let mut session = Session::new(FileSystem::default());
    let out = run(
        &mut session,
        &[
            "mkdir archive",
            "touch report",
            "open report w",
            "wf report q3",
            "mv report archive/2020",
            "ls",
            "cd archive",
            "open 2020 r",
            "cat 2020",
        ],
    );
    assert_eq!(out[4], "Moved successfully!\n");
    assert_eq!(out[5], "-- /\n\t-- archive/\n");
    assert_eq!(out[8], "q3\n");
}
