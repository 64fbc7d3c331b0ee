use supplier_risk::{
    classification_summary, init_logging, log_app_start, log_inputs_selected,
    logging_config_from_env, pipeline_config_from_env, roc_auc, run_pipeline, OnTimeBaseline,
    RiskClassifier,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(&logging_cfg);

    let config = pipeline_config_from_env();
    log_inputs_selected(
        &config.data_root,
        &config.store_path,
        config.csv_export.as_deref(),
    );

    let run = run_pipeline(&config)?;

    let mut baseline = OnTimeBaseline;
    baseline.fit(&run.split.train.features, &run.split.train.labels)?;
    let scores = baseline.predict_proba(&run.split.eval.features)?;
    let auc = roc_auc(&run.split.eval.labels, &scores);
    let summary = classification_summary(&run.split.eval.labels, &scores, 0.5);

    let output = serde_json::json!({
        "report": run.report,
        "baseline": {
            "eval_auc": auc,
            "classification": summary,
        },
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}
