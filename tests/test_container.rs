// Integration tests for the lazy container manager
// Run with cargo test --test test_container

#[path = "../src/container/mod.rs"]
mod container;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use container::{ContainerConfig, ContainerManager, ProcessRuntime};

fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    });
}

fn temp_root() -> PathBuf {
    std::env::temp_dir().join(format!("berth-ctr-{}", uuid::Uuid::new_v4().simple()))
}

fn manager_with(idle_timeout_secs: u64, sweep_interval_secs: u64) -> (Arc<ContainerManager>, PathBuf) {
    let root = temp_root();
    let config = ContainerConfig {
        runtime_root: root.clone(),
        idle_timeout_secs,
        sweep_interval_secs,
        ..ContainerConfig::default()
    };
    let manager = Arc::new(ContainerManager::new(config, Arc::new(ProcessRuntime::new())));
    (manager, root)
}

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[tokio::test]
    async fn test_lazy_creation_on_first_execute() {
        init_tracing();
        let (manager, root) = manager_with(0, 60);

        let before = manager.status("c2").await;
        assert_eq!(before.container_state, "not_created");
        assert!(!before.container_active);

        let outcome = manager
            .execute("c2", "echo hi", None, None)
            .await
            .unwrap();
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.stdout, "hi\n");
        assert_eq!(outcome.command_number, 1);
        assert!(outcome.container_was_created_or_resumed);

        let after = manager.status("c2").await;
        assert_eq!(after.container_state, "running");
        assert!(after.container_active);
        assert_eq!(after.command_count, 1);

        manager.shutdown().await;
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn test_stateful_shell_across_calls() {
        init_tracing();
        let (manager, root) = manager_with(0, 60);

        let out = manager.execute("c3", "cd /tmp", None, None).await.unwrap();
        assert_eq!(out.stdout, "");
        assert_eq!(out.command_number, 1);
        assert!(out.container_was_created_or_resumed);

        let out = manager.execute("c3", "pwd", None, None).await.unwrap();
        assert_eq!(out.stdout, "/tmp\n");
        assert_eq!(out.command_number, 2);
        assert!(!out.container_was_created_or_resumed);

        let out = manager
            .execute("c3", "export X=1", None, None)
            .await
            .unwrap();
        assert_eq!(out.stdout, "");
        assert_eq!(out.command_number, 3);

        let out = manager.execute("c3", "echo $X", None, None).await.unwrap();
        assert_eq!(out.stdout, "1\n");
        assert_eq!(out.command_number, 4);

        manager.shutdown().await;
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn test_idle_reap_then_resume() {
        init_tracing();
        let (manager, root) = manager_with(1, 1);
        let _reaper = manager.start_reaper();

        manager.execute("c4", "echo a", None, None).await.unwrap();
        assert_eq!(manager.status("c4").await.container_state, "running");

        // Wait past the idle timeout plus one sweep.
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let state = manager.status("c4").await.container_state;
            if state == "stopped" {
                break;
            }
            assert!(
                Instant::now() < deadline,
                "container was never reaped (state: {})",
                state
            );
        }

        // Resume in place on the next execute.
        let out = manager.execute("c4", "echo b", None, None).await.unwrap();
        assert_eq!(out.stdout, "b\n");
        assert!(out.container_was_created_or_resumed);
        assert_eq!(manager.status("c4").await.container_state, "running");

        manager.shutdown().await;
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn test_working_dir_argument() {
        init_tracing();
        let (manager, root) = manager_with(0, 60);

        let out = manager
            .execute("c7", "pwd", None, Some("/tmp"))
            .await
            .unwrap();
        assert_eq!(out.stdout, "/tmp\n");

        // A bad working_dir fails the call with a non-zero exit.
        let out = manager
            .execute("c7", "pwd", None, Some("/definitely/not/here"))
            .await
            .unwrap();
        assert_ne!(out.exit_code, 0);

        manager.shutdown().await;
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn test_reset_returns_to_not_created() {
        init_tracing();
        let (manager, root) = manager_with(0, 60);

        manager
            .execute("c8", "echo data > marker.txt", None, None)
            .await
            .unwrap();
        let scratch = manager.work_dir_for("c8");
        assert!(scratch.join("marker.txt").exists());

        manager.reset("c8", false).await.unwrap();
        let status = manager.status("c8").await;
        assert_eq!(status.container_state, "not_created");
        assert_eq!(status.command_count, 0);
        assert!(!scratch.exists());

        // Fresh start afterwards, indistinguishable from a new conversation.
        let out = manager.execute("c8", "echo fresh", None, None).await.unwrap();
        assert_eq!(out.command_number, 1);
        assert!(out.container_was_created_or_resumed);

        manager.shutdown().await;
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn test_reset_keep_scratch_preserves_files() {
        init_tracing();
        let (manager, root) = manager_with(0, 60);

        manager
            .execute("c9", "echo keep > keep.txt", None, None)
            .await
            .unwrap();
        manager.reset("c9", true).await.unwrap();

        let scratch = manager.work_dir_for("c9");
        assert!(scratch.join("keep.txt").exists());

        manager.shutdown().await;
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn test_status_idempotent_without_activity() {
        init_tracing();
        let (manager, root) = manager_with(0, 60);

        manager.execute("c10", "echo x", None, None).await.unwrap();

        let first = manager.status("c10").await;
        let second = manager.status("c10").await;
        assert_eq!(first.container_state, second.container_state);
        assert_eq!(first.command_count, second.command_count);
        assert_eq!(first.work_dir, second.work_dir);
        assert_eq!(first.memory_limit, second.memory_limit);

        manager.shutdown().await;
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn test_parallel_conversations_get_parallel_shells() {
        init_tracing();
        let (manager, root) = manager_with(0, 60);

        // Warm both containers so the measurement covers only the commands.
        manager.execute("p1", "true", None, None).await.unwrap();
        manager.execute("p2", "true", None, None).await.unwrap();

        let start = Instant::now();
        let (a, b) = tokio::join!(
            manager.execute("p1", "sleep 1 && echo one", None, None),
            manager.execute("p2", "sleep 1 && echo two", None, None),
        );
        let elapsed = start.elapsed();

        assert_eq!(a.unwrap().stdout, "one\n");
        assert_eq!(b.unwrap().stdout, "two\n");
        assert!(
            elapsed < Duration::from_millis(1800),
            "two 1s commands should overlap, took {:?}",
            elapsed
        );

        manager.shutdown().await;
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        init_tracing();
        let (manager, root) = manager_with(0, 60);

        manager.execute("c11", "echo x", None, None).await.unwrap();
        manager.shutdown().await;
        assert_eq!(manager.status("c11").await.container_state, "stopped");
        manager.shutdown().await;
        assert_eq!(manager.status("c11").await.container_state, "stopped");

        let _ = std::fs::remove_dir_all(&root);
    }
}
