use super::*;
use crate::runtime::InMemoryRuntime;

fn pool_with(size: usize) -> (Arc<InMemoryRuntime>, ContainerPool) {
    let runtime = Arc::new(InMemoryRuntime::new());
    let config = SandboxConfig {
        pool_size: size,
        ..Default::default()
    };
    let pool = ContainerPool::new(runtime.clone(), config);
    (runtime, pool)
}

fn status_of(statuses: &[PoolStatus], language: Language) -> PoolStatus {
    statuses
        .iter()
        .find(|s| s.language == language)
        .cloned()
        .unwrap()
}

#[tokio::test]
async fn test_init_provisions_every_language() {
    let (runtime, pool) = pool_with(2);
    let report = pool.init_pools(2).await;

    assert_eq!(report, InitReport { succeeded: 4, attempted: 4 });
    assert!(report.is_complete());
    assert_eq!(
        runtime.container_names(),
        vec![
            "sandbox_nodejs_0",
            "sandbox_nodejs_1",
            "sandbox_python_0",
            "sandbox_python_1"
        ]
    );

    let statuses = pool.status().await;
    let python = status_of(&statuses, Language::Python);
    assert_eq!(python.idle, 2);
    assert_eq!(python.allocated, 0);
    assert_eq!(python.pool_size, 2);
    assert_eq!(python.available_permits, 2);
}

#[tokio::test]
async fn test_init_replaces_budgets() {
    let (_, pool) = pool_with(1);
    let held = pool.try_acquire_budget(Language::Python);
    assert!(held.is_some());
    assert!(pool.try_acquire_budget(Language::Python).is_none());

    pool.init_pools(3).await;
    let statuses = pool.status().await;
    assert_eq!(status_of(&statuses, Language::Python).available_permits, 3);
    assert_eq!(status_of(&statuses, Language::Nodejs).pool_size, 3);
}

#[tokio::test]
async fn test_status_tracks_allocations() {
    let (_, pool) = pool_with(2);
    pool.init_pools(2).await;

    let name = pool
        .allocate_blocking(Language::Nodejs, Duration::from_secs(1))
        .await
        .unwrap();
    let statuses = pool.status().await;
    let nodejs = status_of(&statuses, Language::Nodejs);
    assert_eq!(nodejs.idle, 1);
    assert_eq!(nodejs.allocated, 1);

    pool.release(&name, Language::Nodejs).await;
    let statuses = pool.status().await;
    let nodejs = status_of(&statuses, Language::Nodejs);
    assert_eq!(nodejs.idle, 2);
    assert_eq!(nodejs.allocated, 0);
}

#[tokio::test]
async fn test_budget_permits_are_returned_on_drop() {
    let (_, pool) = pool_with(1);
    pool.init_pools(1).await;

    let permit = pool.acquire_budget(Language::Python).await.unwrap();
    assert!(pool.try_acquire_budget(Language::Python).is_none());
    assert!(pool.try_acquire_budget(Language::Nodejs).is_some());
    drop(permit);
    assert!(pool.try_acquire_budget(Language::Python).is_some());
}

#[tokio::test]
async fn test_crashed_release_with_failed_recreation_shrinks_pool() {
    let (runtime, pool) = pool_with(1);
    pool.init_pools(1).await;

    let name = pool
        .allocate_blocking(Language::Python, Duration::from_secs(1))
        .await
        .unwrap();
    runtime.crash(&name);
    runtime.fail_creates(true);
    pool.release(&name, Language::Python).await;

    let statuses = pool.status().await;
    assert_eq!(status_of(&statuses, Language::Python).idle, 0);
    assert_eq!(
        pool.allocate_blocking(Language::Python, Duration::from_millis(50))
            .await,
        None
    );
}

#[tokio::test]
async fn test_crashed_release_is_recreated_and_requeued() {
    let (runtime, pool) = pool_with(1);
    pool.init_pools(1).await;

    let name = pool
        .allocate_blocking(Language::Python, Duration::from_secs(1))
        .await
        .unwrap();
    runtime.crash(&name);
    pool.release(&name, Language::Python).await;

    assert!(pool.is_running(&name).await);
    let statuses = pool.status().await;
    assert_eq!(status_of(&statuses, Language::Python).idle, 1);
}

#[tokio::test]
async fn test_teardown_keeps_allocated_containers() {
    let (runtime, pool) = pool_with(2);
    pool.init_pools(2).await;

    let held = pool
        .allocate_blocking(Language::Python, Duration::from_secs(1))
        .await
        .unwrap();
    pool.teardown().await;

    assert_eq!(runtime.container_names(), vec![held.clone()]);
    let statuses = pool.status().await;
    assert_eq!(status_of(&statuses, Language::Python).idle, 0);
    assert_eq!(status_of(&statuses, Language::Python).allocated, 1);
}
