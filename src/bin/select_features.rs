use sleep_select::{
    init_logging_from_env, log_run_finish, log_run_start, run_selection_stage,
    selection_stage_config_from_env, summary_path,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging = init_logging_from_env()?;
    log_run_start("select_features", &logging);

    let cfg = selection_stage_config_from_env()?;
    println!(
        "Selecting up to {} feature(s) per pair from {} into {}",
        cfg.selection.max_features,
        cfg.input_dir.display(),
        cfg.output_dir.display()
    );

    let summary = run_selection_stage(&cfg)?;
    if summary.skipped_existing {
        println!(
            "{} already holds selections; nothing to do",
            cfg.output_dir.display()
        );
        log_run_finish("select_features", 0, 0, 0);
        return Ok(());
    }

    log_run_finish(
        "select_features",
        summary.pairs_selected,
        summary.pairs_skipped,
        summary.pairs_failed,
    );

    for record in &summary.selections {
        println!(
            "uid {} split {}: mse={:.6} features=[{}]",
            record.key.uid,
            record.key.split,
            record.mse,
            record.features.join(", ")
        );
    }
    for skip in &summary.skips {
        println!(
            "uid {} split {}: skipped ({})",
            skip.key.uid,
            skip.key.split,
            skip.reason.as_str()
        );
    }
    println!(
        "pairs={} selected={} skipped={} failed={} subsets_evaluated={} summary={}",
        summary.pairs_total,
        summary.pairs_selected,
        summary.pairs_skipped,
        summary.pairs_failed,
        summary.subsets_evaluated,
        summary_path(&cfg.output_dir).display()
    );

    Ok(())
}
