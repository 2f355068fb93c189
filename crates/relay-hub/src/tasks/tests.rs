use std::collections::HashSet;

use relay_hub_types::TaskSpec;
use tempfile::TempDir;

use super::*;
use crate::store::FileTaskStore;

fn relay(id: &str) -> RelayId {
    RelayId::new(id).unwrap()
}

fn adhoc_task() -> RelayTask {
    RelayTask::pending(
        new_task_id(),
        TaskSpec::FetchAdHoc {
            payload: "fetch".to_string(),
        },
        Utc::now(),
    )
}

fn config_task(serial: u64) -> RelayTask {
    RelayTask::pending(
        new_task_id(),
        TaskSpec::RelayConfig {
            serial,
            tar_data: b"tar".to_vec(),
        },
        Utc::now(),
    )
}

fn repository(max_number_of_tasks: usize) -> TasksRepository {
    TasksRepository::in_memory(TasksSettings {
        max_number_of_tasks,
        ..TasksSettings::default()
    })
}

fn ids(tasks: &[RelayTask]) -> HashSet<TaskId> {
    tasks.iter().map(|t| t.id.clone()).collect()
}

#[test]
fn new_task_id_is_lowercase_ulid() {
    let id = new_task_id();
    assert_eq!(id.as_str().len(), 26);
    assert!(
        id.as_str()
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase())
    );
}

#[test]
fn limit_rejects_push_and_finishing_frees_a_slot() {
    let repo = repository(3);
    let r1 = relay("relay-1");

    let pushed: Vec<RelayTask> = (0..3).map(|_| adhoc_task()).collect();
    for task in &pushed {
        repo.store_task(&r1, task.clone()).unwrap();
    }

    let err = repo.store_task(&r1, adhoc_task()).unwrap_err();
    assert!(matches!(err, TaskError::LimitReached { limit: 3 }));
    assert_eq!(
        err.to_string(),
        "The maximum number of tasks 3 has been reached"
    );

    repo.update_task(&r1, &pushed[0].id, ResultType::Ok, None)
        .unwrap();
    let extra = adhoc_task();
    repo.store_task(&r1, extra.clone()).unwrap();

    let tasks = repo.get_tasks(&r1).unwrap();
    assert_eq!(tasks.len(), 4);
    let mut expected = ids(&pushed);
    expected.insert(extra.id);
    assert_eq!(ids(&tasks), expected);
}

#[test]
fn relays_do_not_share_quota() {
    let repo = repository(5);
    let (a, b) = (relay("relay-a"), relay("relay-b"));

    for _ in 0..5 {
        repo.store_task(&a, adhoc_task()).unwrap();
    }
    assert!(repo.store_task(&a, adhoc_task()).is_err());
    repo.store_task(&b, adhoc_task()).unwrap();

    assert_eq!(repo.get_tasks(&a).unwrap().len(), 5);
    assert_eq!(repo.get_tasks(&b).unwrap().len(), 1);
}

#[test]
fn unknown_relay_has_no_tasks() {
    let repo = repository(3);
    assert!(repo.get_tasks(&relay("ghost")).unwrap().is_empty());
}

#[test]
fn update_records_result_and_timestamp() {
    let repo = repository(3);
    let r1 = relay("relay-1");
    let task = adhoc_task();
    repo.store_task(&r1, task.clone()).unwrap();

    let updated = repo
        .update_task(&r1, &task.id, ResultType::Failed, Some("timeout".to_string()))
        .unwrap();
    assert_eq!(updated.status, TaskStatus::Failed);
    assert_eq!(updated.result_payload.as_deref(), Some("timeout"));
    assert!(updated.update_timestamp >= updated.creation_timestamp);
    assert_eq!(repo.get_task(&r1, &task.id).unwrap(), updated);
}

#[test]
fn finished_task_cannot_be_updated_again() {
    let repo = repository(3);
    let r1 = relay("relay-1");
    let task = adhoc_task();
    repo.store_task(&r1, task.clone()).unwrap();
    repo.update_task(&r1, &task.id, ResultType::Ok, None).unwrap();

    let err = repo
        .update_task(&r1, &task.id, ResultType::Failed, None)
        .unwrap_err();
    assert!(matches!(
        err,
        TaskError::AlreadyFinished {
            status: TaskStatus::Ok,
            ..
        }
    ));
}

#[test]
fn update_of_unknown_task_is_not_found() {
    let repo = repository(3);
    let err = repo
        .update_task(&relay("relay-1"), &TaskId::from("nope"), ResultType::Ok, None)
        .unwrap_err();
    assert!(matches!(err, TaskError::NotFound { .. }));
}

#[test]
fn status_filter() {
    let repo = repository(3);
    let r1 = relay("relay-1");
    let done = adhoc_task();
    let open = adhoc_task();
    repo.store_task(&r1, done.clone()).unwrap();
    repo.store_task(&r1, open.clone()).unwrap();
    repo.update_task(&r1, &done.id, ResultType::Ok, None).unwrap();

    let pending = repo
        .get_tasks_with_status(&r1, TaskStatus::Pending)
        .unwrap();
    assert_eq!(ids(&pending), HashSet::from([open.id]));
}

#[test]
fn finished_tasks_expire_after_ttl() {
    let repo = TasksRepository::in_memory(TasksSettings {
        max_number_of_tasks: 3,
        finished_task_ttl: Duration::from_millis(1),
    });
    let r1 = relay("relay-1");
    let done = adhoc_task();
    let open = adhoc_task();
    repo.store_task(&r1, done.clone()).unwrap();
    repo.store_task(&r1, open.clone()).unwrap();
    repo.update_task(&r1, &done.id, ResultType::Ok, None).unwrap();

    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(ids(&repo.get_tasks(&r1).unwrap()), HashSet::from([open.id]));
}

#[test]
fn expired_tasks_stay_in_history() {
    let store = Arc::new(MemoryTaskStore::new());
    let repo = TasksRepository::new(
        store.clone(),
        TasksSettings {
            max_number_of_tasks: 3,
            finished_task_ttl: Duration::from_millis(1),
        },
    );
    let r1 = relay("relay-1");
    let done = adhoc_task();
    repo.store_task(&r1, done.clone()).unwrap();
    repo.update_task(&r1, &done.id, ResultType::Ok, Some("42".to_string()))
        .unwrap();

    std::thread::sleep(Duration::from_millis(20));
    let open = adhoc_task();
    repo.store_task(&r1, open.clone()).unwrap();

    assert_eq!(ids(&repo.get_tasks(&r1).unwrap()), HashSet::from([open.id.clone()]));
    let history = repo.get_task_history(&r1).unwrap();
    assert_eq!(ids(&history), HashSet::from([done.id.clone(), open.id]));
    let finished = history.iter().find(|t| t.id == done.id).unwrap();
    assert_eq!(finished.status, TaskStatus::Ok);
    assert_eq!(finished.result_payload.as_deref(), Some("42"));
    assert_eq!(store.load(&r1).unwrap().len(), 2);
}

#[test]
fn predicate_rejection_stores_nothing() {
    let repo = repository(3);
    let r1 = relay("relay-1");
    repo.store_task(&r1, config_task(7)).unwrap();

    let stored = repo
        .store_task_if(&r1, config_task(7), |tasks| {
            !tasks.iter().any(|t| t.is_pending_config_for(7))
        })
        .unwrap();
    assert!(!stored);
    assert_eq!(repo.get_tasks(&r1).unwrap().len(), 1);
}

#[test]
fn concurrent_dedup_across_file_stores_inserts_once() {
    let dir = TempDir::new().unwrap();
    let r1 = relay("relay-1");

    // Separate repositories over one directory behave like separate processes.
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let repo = TasksRepository::new(
                Arc::new(FileTaskStore::new(dir.path())),
                TasksSettings::default(),
            );
            let r1 = r1.clone();
            std::thread::spawn(move || {
                repo.store_task_if(&r1, config_task(42), |tasks| {
                    !tasks.iter().any(|t| t.is_pending_config_for(42))
                })
                .unwrap()
            })
        })
        .collect();

    let inserted = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|stored| *stored)
        .count();
    assert_eq!(inserted, 1);

    let repo = TasksRepository::new(
        Arc::new(FileTaskStore::new(dir.path())),
        TasksSettings::default(),
    );
    assert_eq!(repo.get_tasks(&r1).unwrap().len(), 1);
}
