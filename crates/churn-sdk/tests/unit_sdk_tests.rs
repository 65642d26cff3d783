//! Pipeline tests: training, daily scoring and drift monitoring against the
//! in-memory stores

mod common;

use churn_core::registry::FeatureRegistry;
use churn_core::{ChurnType, RiskTier, Value};
use churn_runtime::{DriftStatus, PlaybookExecution};
use churn_sdk::{
    BatchScorer, BatchScorerBuilder, DriftMonitor, DriftWindows, InMemoryPredictionStore,
    InMemorySampleStore, OverallStatus, PipelineConfig, PredictionStore, SdkError, TrainedModel,
    Trainer, TrainingReport, METRICS_FILE,
};
use common::{
    active_members, blocked_defaulter, pipeline_config, training_samples, verified, ymd,
};

fn history_store() -> InMemorySampleStore {
    InMemorySampleStore::new().with_samples(training_samples(11, ymd(2024, 3, 1), 8, 60))
}

async fn trained(config: &PipelineConfig) -> TrainedModel {
    let trainer = Trainer::new(config.clone());
    let table = trainer.load(&history_store()).await.unwrap();
    trainer.train_final_model(&table, &config.output_dir).unwrap()
}

// ========== Training Tests ==========

#[tokio::test]
async fn test_walk_forward_validation_aggregates_folds() {
    let tmp = tempfile::tempdir().unwrap();
    let trainer = Trainer::new(pipeline_config(tmp.path()));
    let table = trainer.load(&history_store()).await.unwrap();
    assert_eq!(table.len(), 480);

    let report = trainer.run_walk_forward_validation(&table).unwrap();
    // validation windows June, July, August, September
    assert_eq!(report.folds.len() + report.skipped.len(), 4);
    assert!(!report.folds.is_empty());
    for pair in report.folds.windows(2) {
        assert!(pair[0].info.val_end <= pair[1].info.val_start);
        assert!(pair[0].info.n_train < pair[1].info.n_train);
    }

    assert_eq!(report.aggregate.len(), 4);
    for (name, s) in &report.aggregate {
        assert!(s.min <= s.mean && s.mean <= s.max, "{}: {:?}", name, s);
        assert!(s.std >= 0.0);
    }
}

#[tokio::test]
async fn test_final_model_writes_metrics_json() {
    let tmp = tempfile::tempdir().unwrap();
    let config = pipeline_config(tmp.path());
    let model = trained(&config).await;

    assert!(model.model_dir.starts_with(tmp.path()));
    let dir_name = model.model_dir.file_name().unwrap().to_str().unwrap();
    assert!(dir_name.starts_with('v'));

    let content = std::fs::read_to_string(model.model_dir.join(METRICS_FILE)).unwrap();
    let report: TrainingReport = serde_json::from_str(&content).unwrap();
    assert_eq!(report, model.report);
    assert_eq!(report.version, dir_name);
    assert_eq!(report.train_samples, 420);
    assert_eq!(report.test_samples, 60);
    assert_eq!(report.train_period, (ymd(2024, 3, 1), ymd(2024, 10, 1)));
    assert_eq!(report.test_period, (ymd(2024, 10, 1), ymd(2024, 11, 1)));
    assert_eq!(report.features, FeatureRegistry::standard().all_features());
    assert_eq!(report.feature_count, report.features.len());
    assert_eq!(report.target_checks.len(), 4);
    assert!(report.test_metrics.roc_auc > 0.75, "roc_auc = {}", report.test_metrics.roc_auc);
}

#[tokio::test]
async fn test_empty_holdout_aborts_training() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = pipeline_config(tmp.path());
    config.model.walk_forward.test_start = ymd(2025, 1, 1);
    config.model.walk_forward.test_end = ymd(2025, 2, 1);
    config.model.walk_forward.data_cutoff = ymd(2025, 2, 1);

    let trainer = Trainer::new(config);
    let table = trainer.load(&history_store()).await.unwrap();
    let result = trainer.train_final_model(&table, tmp.path());
    assert!(matches!(result, Err(SdkError::EmptyHoldout(_))));
    assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_run_can_skip_cross_validation() {
    let tmp = tempfile::tempdir().unwrap();
    let config = pipeline_config(tmp.path()).skip_cv(true);
    let outcome = Trainer::new(config).run(&history_store()).await.unwrap();

    assert!(outcome.walk_forward.is_none());
    assert!(outcome.model.model_dir.join(METRICS_FILE).is_file());
    assert!(outcome.model.ensemble.is_fitted());
}

// ========== Scoring Tests ==========

#[tokio::test]
async fn test_daily_scoring_publishes_predictions() {
    let tmp = tempfile::tempdir().unwrap();
    let config = pipeline_config(tmp.path());
    let model = trained(&config).await;
    let score_date = ymd(2024, 11, 15);

    let mut members = active_members(5, 40);
    members.push(blocked_defaulter(99_999));
    let samples = history_store().with_members(members);
    let predictions = InMemoryPredictionStore::new();

    let scorer = BatchScorer::load(&model.model_dir, config.clone())
        .unwrap()
        .with_score_date(score_date);
    assert_eq!(scorer.model_version(), model.report.version);

    let summary = scorer.run(&samples, &predictions).await.unwrap();
    assert_eq!(summary.total_scored, 41);
    assert_eq!(summary.score_date, score_date);
    assert_eq!(summary.tier_counts.values().sum::<usize>(), 41);
    assert_eq!(summary.churn_type_counts.values().sum::<usize>(), 41);
    assert_eq!(samples.refresh_count(), 1);

    let current = predictions.current(score_date).await.unwrap();
    assert_eq!(current.len(), 41);
    for p in &current {
        assert!((0.0..=1.0).contains(&p.churn_probability));
        assert!(p.top_3_reasons.len() <= 3);
        assert_eq!(p.segment, "REGULAR");
        assert_eq!(p.model_version, model.report.version);
        if p.risk_tier == RiskTier::Low {
            assert_eq!(p.churn_type, ChurnType::None);
            assert_eq!(p.playbook_id, "PB_LOW_ACTIVE");
        }
    }

    let defaulter = current.iter().find(|p| p.member_id == 99_999).unwrap();
    assert!(defaulter.risk_tier.is_at_risk(), "tier = {}", defaulter.risk_tier);
    assert_eq!(defaulter.churn_type, ChurnType::Default);
    let expected = match defaulter.risk_tier {
        RiskTier::High => "PB_HIGH_FINANCIAL",
        _ => "PB_MEDIUM_FINANCIAL",
    };
    assert_eq!(defaulter.playbook_id, expected);
    assert_eq!(defaulter.days_since_last_checkin, Some(40.0));

    // a second run on the same day replaces the day and appends history
    scorer.run(&samples, &predictions).await.unwrap();
    assert_eq!(predictions.current(score_date).await.unwrap().len(), 41);
    assert_eq!(predictions.history_len().await, 82);
}

#[tokio::test]
async fn test_no_active_members_writes_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let config = pipeline_config(tmp.path()).refresh_views(false);
    let model = trained(&config).await;
    let score_date = ymd(2024, 11, 15);

    let samples = history_store();
    let predictions = InMemoryPredictionStore::new();
    let scorer = BatchScorer::load(&model.model_dir, config)
        .unwrap()
        .with_score_date(score_date);

    let summary = scorer.run(&samples, &predictions).await.unwrap();
    assert_eq!(summary.total_scored, 0);
    assert!(summary.tier_counts.is_empty());
    assert_eq!(samples.refresh_count(), 0);
    assert!(predictions.current(score_date).await.unwrap().is_empty());
    assert_eq!(predictions.history_len().await, 0);
}

#[tokio::test]
async fn test_circuit_breaker_halts_scoring() {
    let tmp = tempfile::tempdir().unwrap();
    let config = pipeline_config(tmp.path());
    let model = trained(&config).await;
    let score_date = ymd(2024, 11, 15);

    let mut members = active_members(6, 20);
    for row in members.iter_mut().take(4) {
        row.columns.insert("idade".to_string(), Value::Null);
    }
    let samples = history_store().with_members(members);
    let predictions = InMemoryPredictionStore::new();

    let scorer = BatchScorerBuilder::new()
        .with_config(config)
        .with_score_date(score_date)
        .build()
        .unwrap();
    assert_eq!(scorer.model_version(), model.report.version);

    let result = scorer.run(&samples, &predictions).await;
    assert!(matches!(result, Err(SdkError::RuntimeError(_))));
    assert!(predictions.current(score_date).await.unwrap().is_empty());
}

// ========== Drift Tests ==========

fn drift_config() -> PipelineConfig {
    PipelineConfig::new().with_drift_windows(DriftWindows {
        reference_start: ymd(2024, 3, 1),
        reference_end: ymd(2024, 6, 1),
        current_days: 30,
    })
}

#[tokio::test]
async fn test_drift_monitor_flags_shifted_feature() {
    let mut rows = training_samples(21, ymd(2024, 3, 1), 8, 60);
    for row in rows.iter_mut().filter(|r| r.meta.reference_date >= ymd(2024, 10, 1)) {
        row.columns.insert("idade".to_string(), Value::Number(500.0));
    }
    let samples = InMemorySampleStore::new().with_samples(rows);

    let predictions = InMemoryPredictionStore::new();
    predictions
        .append_history(
            (0..10)
                .map(|i| verified(i, ymd(2024, 10, 10), RiskTier::High, 0.8, true))
                .collect(),
        )
        .await;

    let report = DriftMonitor::new(drift_config())
        .with_today(ymd(2024, 11, 1))
        .run_full_check(&samples, &predictions)
        .await
        .unwrap();

    let idade = report
        .feature_drift
        .iter()
        .find(|f| f.feature == "idade")
        .unwrap();
    assert_eq!(idade.status, DriftStatus::Alert);
    assert_eq!(idade.cur_mean, Some(500.0));
    assert_eq!(report.overall_status, OverallStatus::RetrainRecommended);

    assert_eq!(report.concept_drift.len(), 1);
    assert_eq!(report.concept_drift[0].month, ymd(2024, 10, 1));
    assert_eq!(report.concept_drift[0].total_predictions, 10);
}

#[tokio::test]
async fn test_drift_monitor_hit_rate_counts_interventions() {
    let predictions = InMemoryPredictionStore::new();
    let day = ymd(2024, 10, 10);
    let mut history: Vec<_> = (0..4)
        .map(|i| verified(i, day, RiskTier::High, 0.85, true))
        .collect();
    history.push(verified(10, day, RiskTier::Medium, 0.5, true));
    history.push(verified(11, day, RiskTier::Medium, 0.5, false));
    history.push(verified(12, day, RiskTier::Medium, 0.5, false));
    // outside the three-month window
    history.push(verified(13, ymd(2024, 6, 1), RiskTier::Medium, 0.5, false));
    predictions.append_history(history).await;
    predictions
        .record_execution(PlaybookExecution {
            member_id: 11,
            prediction_date: day,
            playbook_id: "PB_MEDIUM_BEHAVIORAL".to_string(),
        })
        .await;

    let monitor = DriftMonitor::new(drift_config()).with_today(ymd(2024, 11, 1));
    let rates = monitor.check_hit_rate(&predictions).await.unwrap();
    assert_eq!(rates.len(), 2);
    assert_eq!(rates[0].tier, RiskTier::High);
    assert_eq!(rates[0].hit_rate, 1.0);

    let medium = &rates[1];
    assert_eq!(medium.total, 3);
    assert_eq!(medium.true_positives, 1);
    assert_eq!(medium.recovered, 1);
    assert_eq!(medium.false_positives, 2);
    assert!(!medium.below_floor);

    // without feature data every PSI reads as zero
    let report = monitor
        .run_full_check(&InMemorySampleStore::new(), &predictions)
        .await
        .unwrap();
    assert!(report.feature_drift.iter().all(|f| f.status == DriftStatus::Ok));
    assert_eq!(report.overall_status, OverallStatus::Healthy);
}
