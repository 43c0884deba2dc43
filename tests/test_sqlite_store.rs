//! SQLite-backed storage against real database files

use autoteam::config::{StorageBackend, StorageSection};
use autoteam::storage::{create_store, JobStore, SqliteStore, StorageError};
use tempfile::TempDir;
use uuid::Uuid;

fn db_path(dir: &TempDir) -> std::path::PathBuf {
    dir.path().join("autoteam.db")
}

#[tokio::test]
async fn test_jobs_and_outputs_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);

    let job = {
        let store = SqliteStore::open(&path).unwrap();
        let job = store.create_job("Notes", "Make an AI notes app").await.unwrap();
        let mut writer = store.open_writer(job.id).await.unwrap();
        writer.append_stage_output("Boss", "Goal: notes", false).await.unwrap();
        writer
            .append_stage_output("Product Manager", "An error occurred", true)
            .await
            .unwrap();
        writer.close().await.unwrap();
        job
    };

    let reopened = SqliteStore::open(&path).unwrap();
    assert_eq!(reopened.get_job(job.id).await.unwrap(), Some(job.clone()));

    let outputs = reopened.list_stage_outputs(job.id).await.unwrap();
    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[0].stage_name, "Boss");
    assert_eq!(outputs[0].sequence, 1);
    assert!(!outputs[0].is_error);
    assert_eq!(outputs[1].sequence, 2);
    assert!(outputs[1].is_error);
}

#[tokio::test]
async fn test_sequences_are_per_job() {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(db_path(&dir)).unwrap();

    let first = store.create_job("First", "first idea").await.unwrap();
    let second = store.create_job("Second", "second idea").await.unwrap();
    let mut first_writer = store.open_writer(first.id).await.unwrap();
    let mut second_writer = store.open_writer(second.id).await.unwrap();

    first_writer.append_stage_output("Boss", "a", false).await.unwrap();
    second_writer.append_stage_output("Boss", "b", false).await.unwrap();
    first_writer
        .append_stage_output("Product Manager", "c", false)
        .await
        .unwrap();

    let first_outputs = store.list_stage_outputs(first.id).await.unwrap();
    let second_outputs = store.list_stage_outputs(second.id).await.unwrap();
    assert_eq!(
        first_outputs.iter().map(|o| o.sequence).collect::<Vec<_>>(),
        vec![1, 2]
    );
    assert_eq!(second_outputs.len(), 1);
    assert_eq!(second_outputs[0].sequence, 1);
    assert_eq!(second_outputs[0].content, "b");
}

#[tokio::test]
async fn test_record_ids_increase() {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(db_path(&dir)).unwrap();
    let job = store.create_job("Ids", "an idea").await.unwrap();
    let mut writer = store.open_writer(job.id).await.unwrap();

    let first = writer.append_stage_output("Boss", "a", false).await.unwrap();
    let second = writer.append_stage_output("QA", "b", false).await.unwrap();
    assert!(second > first);
}

#[tokio::test]
async fn test_list_jobs_newest_first_with_limit() {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(db_path(&dir)).unwrap();

    for title in ["one", "two", "three"] {
        store.create_job(title, "some idea").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let titles: Vec<String> = store
        .list_jobs(2)
        .await
        .unwrap()
        .into_iter()
        .map(|job| job.title)
        .collect();
    assert_eq!(titles, vec!["three", "two"]);
}

#[tokio::test]
async fn test_writer_rejects_unknown_job_and_closed_appends() {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(db_path(&dir)).unwrap();

    let missing = Uuid::new_v4();
    assert!(matches!(
        store.open_writer(missing).await,
        Err(StorageError::JobNotFound(id)) if id == missing
    ));

    let job = store.create_job("Closed", "an idea").await.unwrap();
    let mut writer = store.open_writer(job.id).await.unwrap();
    writer.close().await.unwrap();
    assert!(matches!(
        writer.append_stage_output("Boss", "late", false).await,
        Err(StorageError::WriterClosed(_))
    ));
    assert!(store.list_stage_outputs(job.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_create_store_selects_sqlite_file() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);
    let section = StorageSection {
        backend: StorageBackend::Sqlite,
        path: Some(path.clone()),
    };

    let store = create_store(&section).unwrap();
    let job = store.create_job("Configured", "an idea").await.unwrap();
    assert!(path.exists());

    let reopened = SqliteStore::open(&path).unwrap();
    assert!(reopened.get_job(job.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_create_store_sqlite_without_path_is_in_memory() {
    let section = StorageSection {
        backend: StorageBackend::Sqlite,
        path: None,
    };
    let store = create_store(&section).unwrap();
    let job = store.create_job("Ephemeral", "an idea").await.unwrap();

    let mut writer = store.open_writer(job.id).await.unwrap();
    writer.append_stage_output("Boss", "done", false).await.unwrap();
    assert_eq!(store.list_stage_outputs(job.id).await.unwrap().len(), 1);
}
