use pyresource::core::resources::{SigStats, Truthiness};
use pyresource::core::testing::{ErrorManager, MockDataset};
use pyresource::{
    CachingManager, Distribution, Kind, LoggingManager, Manager, Path, ResourceError,
    ResourceManager, StatsManager,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

fn stdlib() -> Distribution {
    Distribution::builtin("3.7")
}

fn core() -> Arc<dyn Manager> {
    let mut stats = SigStats {
        count: 4,
        ..Default::default()
    };
    stats.num_args = BTreeMap::from([(1, 3), (2, 1)]);

    let mut data = MockDataset::new();
    data.add(&stdlib(), "json.dumps", Kind::Function)
        .add(&stdlib(), "builtins.str", Kind::Type)
        .docs(&stdlib(), "json.dumps", "Serialize obj to a JSON formatted str.")
        .return_type(&stdlib(), "json.dumps", "builtins.str", Truthiness::Stub)
        .sig_stats(&stdlib(), "json.dumps", stats);
    let (opts, _) = data.options();
    let (manager, _ready) = ResourceManager::new(opts);
    Arc::new(manager)
}

#[tokio::test]
async fn decorators_are_transparent() {
    let plain = core();
    let stacked: Arc<dyn Manager> = Arc::new(StatsManager::new(Arc::new(LoggingManager::new(
        Arc::new(CachingManager::new(core())),
    ))));

    for manager in [&plain, &stacked] {
        let dumps = manager.resolve_symbol(&Path::new("json.dumps")).await.unwrap();
        assert_eq!(dumps.path_string(), "json.dumps");
        assert_eq!(manager.kind(&dumps).await.unwrap(), Kind::Function);

        let returns = manager.return_types(&dumps).await.unwrap();
        assert_eq!(returns[0].path_string(), "builtins.str");
        assert_eq!(manager.num_args_frequency(&dumps, 1).await.unwrap(), Some(0.75));
        assert_eq!(
            manager.cumulative_num_args_frequency(&dumps, 2).await.unwrap(),
            Some(1.0)
        );
        assert_eq!(manager.keyword_arg_frequency(&dumps, "indent").await.unwrap(), None);
        assert!(manager.arg_spec(&dumps).await.unwrap().is_none());

        let err = manager
            .resolve_symbol(&Path::new("json.missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResourceError::PathNotFound { .. }));
    }
}

#[tokio::test]
async fn caching_memoizes_successful_calls() {
    let stats = Arc::new(StatsManager::new(core()));
    let cached = CachingManager::new(stats.clone());

    let dumps = cached.resolve_symbol(&Path::new("json.dumps")).await.unwrap();
    for _ in 0..3 {
        let docs = cached.documentation(&dumps).await.unwrap().unwrap();
        assert!(docs.text.starts_with("Serialize"));
        assert_eq!(
            cached.resolve_symbol(&Path::new("json.dumps")).await.unwrap(),
            dumps
        );
    }
    assert_eq!(stats.call_count("documentation"), 1);
    assert_eq!(stats.call_count("resolve_symbol"), 1);
    assert!(cached.hit_rate() > 0.0);

    // live state is never memoized
    cached.distribution_loaded(&stdlib()).await.unwrap();
    cached.distribution_loaded(&stdlib()).await.unwrap();
    assert_eq!(stats.call_count("distribution_loaded"), 2);

    cached.reset().await.unwrap();
    assert_eq!(cached.cached_len(), 0);
    cached.documentation(&dumps).await.unwrap();
    assert_eq!(stats.call_count("documentation"), 2);
}

/// Call every query method once, returning how many of them failed
async fn query_everything(manager: &dyn Manager) -> usize {
    let dist = stdlib();
    let path = Path::new("json.dumps");
    let symbol = pyresource::Symbol::default();
    let results = [
        manager.distributions().await.is_err(),
        manager.distribution_loaded(&dist).await.is_err(),
        manager.packages().await.is_err(),
        manager.distributions_for_package("json").await.is_err(),
        manager.resolve_path(&path).await.is_err(),
        manager.resolve_symbol(&path).await.is_err(),
        manager.new_symbol(&dist, &path).await.is_err(),
        manager.child_symbol(&symbol, "dumps").await.is_err(),
        manager.kind(&symbol).await.is_err(),
        manager.symbol_type(&symbol).await.is_err(),
        manager.bases(&symbol).await.is_err(),
        manager.children(&symbol).await.is_err(),
        manager.canonical_symbols(&dist).await.is_err(),
        manager.top_levels(&dist).await.is_err(),
        manager.documentation(&symbol).await.is_err(),
        manager.symbol_counts(&symbol).await.is_err(),
        manager.arg_spec(&symbol).await.is_err(),
        manager.signatures(&symbol).await.is_err(),
        manager.sig_stats(&symbol).await.is_err(),
        manager.kwargs(&symbol).await.is_err(),
        manager.keyword_arg_frequency(&symbol, "indent").await.is_err(),
        manager.num_args_frequency(&symbol, 1).await.is_err(),
        manager.cumulative_num_args_frequency(&symbol, 1).await.is_err(),
        manager.return_types(&symbol).await.is_err(),
        manager.truthy_return_types(&symbol).await.is_err(),
    ];
    results.iter().filter(|failed| **failed).count()
}

const QUERY_METHODS: usize = 25;

#[tokio::test]
async fn errors_are_never_cached() {
    let failing = Arc::new(ErrorManager::new());
    let cached = CachingManager::new(failing.clone());

    for _ in 0..2 {
        let err = cached.resolve_symbol(&Path::new("json.dumps")).await.unwrap_err();
        assert!(matches!(err, ResourceError::Rpc(msg) if msg == "resolve_symbol failed"));
    }
    assert_eq!(failing.calls(), 2);

    for _ in 0..2 {
        assert_eq!(query_everything(&cached).await, QUERY_METHODS);
    }
    assert_eq!(failing.calls(), 2 + 2 * QUERY_METHODS);
    assert_eq!(cached.cached_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn cached_values_expire() {
    let stats = Arc::new(StatsManager::new(core()));
    let cached = CachingManager::with_capacity(stats.clone(), 16, Duration::from_secs(60));

    cached.packages().await.unwrap();
    cached.packages().await.unwrap();
    assert_eq!(stats.call_count("packages"), 1);

    tokio::time::advance(Duration::from_secs(61)).await;
    cached.packages().await.unwrap();
    assert_eq!(stats.call_count("packages"), 2);
}

#[tokio::test]
async fn stats_pass_errors_through_and_count_them() {
    let stats = StatsManager::new(Arc::new(ErrorManager::new()));
    for _ in 0..12 {
        let symbol = pyresource::Symbol::default();
        let err = stats.kind(&symbol).await.unwrap_err();
        assert!(matches!(err, ResourceError::Rpc(_)));
    }
    assert!(stats.packages().await.is_err());

    assert_eq!(stats.call_count("kind"), 12);
    assert_eq!(stats.call_count("packages"), 1);
    assert_eq!(stats.call_count("bases"), 0);

    let report = stats.render_report();
    assert!(report.contains("kind: duplicate calls: 11 of 12"));
}

#[tokio::test]
async fn logging_passes_errors_through() {
    let failing = Arc::new(ErrorManager::new());
    let logged = LoggingManager::new(failing.clone());

    let err = logged.top_levels(&stdlib()).await.unwrap_err();
    assert!(matches!(err, ResourceError::Rpc(msg) if msg == "top_levels failed"));
    assert!(logged.close().await.is_err());
    assert_eq!(failing.calls(), 2);
}
