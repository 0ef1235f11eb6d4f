use std::fs;
use std::path::Path;

use sleep_select::{
    generate_user_splits, split_file_name, ObservationTable, PairKey, SessionSource, SplitSide,
    WalkForwardConfig, SESSION_COLUMN,
};
use tempfile::TempDir;

fn write_session(dir: &Path, name: &str, body: &str) -> SessionSource {
    let path = dir.join(format!("features_session_{name}.csv"));
    fs::write(&path, body).expect("session fixture should be written");
    SessionSource::new(name, path)
}

fn read_split(dir: &Path, side: SplitSide, uid: &str, split: usize) -> ObservationTable {
    let key = PairKey::new(uid, split);
    ObservationTable::from_path(&dir.join(split_file_name(side, &key, "")))
        .expect("split file should load")
}

fn dates(table: &ObservationTable) -> Vec<String> {
    table
        .rows()
        .iter()
        .map(|row| row.label_date.format("%Y-%m-%d").to_string())
        .collect()
}

#[test]
fn six_day_user_gets_three_cumulative_splits_across_sessions() {
    let input = TempDir::new().expect("tempdir");
    let out = TempDir::new().expect("tempdir");
    let sessions = vec![
        write_session(
            input.path(),
            "A",
            "uid,label_date,sleep_quality,steps\n\
             1,2025-03-05,4,500\n\
             1,2025-03-01,2,100\n\
             1,2025-03-03,3,300\n",
        ),
        write_session(
            input.path(),
            "B",
            "uid,label_date,sleep_score,steps\n\
             1,2025-03-06,5,600\n\
             1,2025-03-02,2,200\n\
             1,2025-03-04,3,400\n",
        ),
    ];

    let summary = generate_user_splits(&sessions, out.path(), &WalkForwardConfig::default())
        .expect("split generation should succeed");

    assert_eq!(summary.sessions_loaded, 2);
    assert_eq!(summary.users_seen, 1);
    assert_eq!(summary.users_split, 1);
    assert_eq!(summary.splits_written, 3);
    assert!(summary.errors.is_empty());

    for split in 0..3 {
        let train = read_split(out.path(), SplitSide::Train, "1", split);
        let test = read_split(out.path(), SplitSide::Test, "1", split);
        assert_eq!(train.len(), 3 + split);
        assert_eq!(test.len(), 1);

        let train_dates = dates(&train);
        let mut sorted = train_dates.clone();
        sorted.sort();
        assert_eq!(train_dates, sorted);
        assert!(train_dates.last() < dates(&test).first());
        assert!(train.column_index(SESSION_COLUMN).is_some());
    }

    let test = read_split(out.path(), SplitSide::Test, "1", 2);
    assert_eq!(dates(&test), vec!["2025-03-06".to_string()]);
    assert_eq!(test.rows()[0].sleep_quality, 5.0);
    assert!(!out
        .path()
        .join(split_file_name(SplitSide::Train, &PairKey::new("1", 3), ""))
        .exists());
}

#[test]
fn short_histories_are_skipped_and_missing_sessions_recorded() {
    let input = TempDir::new().expect("tempdir");
    let out = TempDir::new().expect("tempdir");
    let mut sessions = vec![write_session(
        input.path(),
        "A",
        "uid,label_date,sleep_quality,steps\n\
         short,2025-03-01,3,1\n\
         short,2025-03-02,3,2\n\
         short,2025-03-03,3,3\n\
         short,2025-03-04,3,4\n\
         long,2025-03-01,1,1\n\
         long,2025-03-02,2,2\n\
         long,2025-03-03,3,3\n\
         long,2025-03-04,4,4\n\
         long,2025-03-05,5,5\n\
         long,2025-03-06,,6\n",
    )];
    sessions.push(SessionSource::new("C", input.path().join("absent.csv")));

    let summary = generate_user_splits(&sessions, out.path(), &WalkForwardConfig::default())
        .expect("a missing session file is not fatal");

    assert_eq!(summary.sessions_loaded, 1);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].scope, "session C");
    assert_eq!(summary.rows_dropped_unlabeled, 1);
    assert_eq!(summary.users_seen, 2);
    assert_eq!(summary.users_skipped, 1);
    assert_eq!(summary.skips[0].uid, "short");
    assert_eq!(summary.skips[0].observations, 4);
    assert_eq!(summary.skips[0].required, 5);

    // Five labelled rows with three training days leave two splits.
    assert_eq!(summary.splits_written, 2);
    let names: Vec<String> = fs::read_dir(out.path())
        .expect("output dir readable")
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .filter(|name| name.contains("short"))
        .collect();
    assert!(names.is_empty());
}

#[test]
fn max_splits_caps_long_histories() {
    let input = TempDir::new().expect("tempdir");
    let out = TempDir::new().expect("tempdir");
    let mut body = String::from("uid,label_date,sleep_quality,steps\n");
    for day in 1..=20 {
        body.push_str(&format!("9,2025-04-{day:02},{},{}\n", day % 5, day * 10));
    }
    let sessions = vec![write_session(input.path(), "A", &body)];
    let cfg = WalkForwardConfig {
        min_train_days: 2,
        max_splits: 4,
    };

    let summary = generate_user_splits(&sessions, out.path(), &cfg).expect("splits");

    assert_eq!(summary.splits_written, 4);
    let last_train = read_split(out.path(), SplitSide::Train, "9", 3);
    assert_eq!(last_train.len(), 5);
    assert_eq!(
        dates(&read_split(out.path(), SplitSide::Test, "9", 3)),
        vec!["2025-04-06".to_string()]
    );
}
