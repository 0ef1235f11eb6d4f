use sleep_select::{
    generate_user_splits, init_logging_from_env, log_run_finish, log_run_start,
    split_stage_config_from_env, write_summary,
};

const SPLIT_SUMMARY_FILE: &str = "split_summary.json";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging = init_logging_from_env()?;
    log_run_start("generate_splits", &logging);

    let cfg = split_stage_config_from_env()?;
    println!(
        "Generating walk-forward splits from {} session file(s) into {} (min_train_days={}, max_splits={})",
        cfg.sessions.len(),
        cfg.output_dir.display(),
        cfg.walk_forward.min_train_days,
        cfg.walk_forward.max_splits
    );

    let summary = generate_user_splits(&cfg.sessions, &cfg.output_dir, &cfg.walk_forward)?;
    let summary_path = cfg.output_dir.join(SPLIT_SUMMARY_FILE);
    write_summary(&summary_path, &summary)?;

    log_run_finish(
        "generate_splits",
        summary.users_split,
        summary.users_skipped,
        summary.errors.len(),
    );

    println!(
        "users={} split={} skipped={} splits_written={} errors={} summary={}",
        summary.users_seen,
        summary.users_split,
        summary.users_skipped,
        summary.splits_written,
        summary.errors.len(),
        summary_path.display()
    );
    for skip in &summary.skips {
        println!(
            "  skipped uid {}: {} observation(s), need {}",
            skip.uid, skip.observations, skip.required
        );
    }

    Ok(())
}
