//! Integration tests for checkpointing and resume.
//!
//! These tests verify that the executor:
//! 1. Keeps the last good checkpoint when a batch fails
//! 2. Resumes from the newest checkpoint and skips finished batches
//! 3. Produces the same final results as an uninterrupted run
//! 4. Refuses to finalize when keys are missing or unexpected
//! 5. Keeps the results of different models apart

mod common;

use common::{ScriptedBackend, executor, identity, items, load_final};
use probe_config::ProbeConfig;
use probe_data::PairKey;
use probe_exec::{
    BatchRange, CheckpointKey, CheckpointStore, ExecutionOutcome, ExecutorError, ProbeResult,
    reconcile::expected_keys,
};
use tempfile::tempdir;

#[test]
fn test_restart_processes_only_remaining_batch() {
    let data = items(25_000, 1);

    let crash_dir = tempdir().unwrap();
    // Calls 0-1 are batch 0, calls 2-3 batch 1; call 4 is batch 2's forward pass.
    let mut first = executor(crash_dir.path(), ScriptedBackend::failing_on(4), 10_000);
    let err = first.run(&identity(), &data).unwrap_err();
    let ExecutorError::Batch {
        index,
        last_checkpoint,
        ..
    } = err
    else {
        panic!("expected batch failure");
    };
    assert_eq!(index, 2);
    let last_checkpoint = last_checkpoint.unwrap();
    assert!(
        last_checkpoint
            .to_string_lossy()
            .ends_with("P19_1000_10_high2low_qa_incomplete_10000_to_20000.json")
    );

    let store = CheckpointStore::flat(crash_dir.path());
    let remaining: Vec<BatchRange> = store
        .scan(&identity())
        .unwrap()
        .into_iter()
        .map(|(r, _)| r)
        .collect();
    assert_eq!(remaining, vec![BatchRange { start: 10_000, end: 20_000 }]);

    let mut second = executor(crash_dir.path(), ScriptedBackend::default(), 10_000);
    let outcome = second.run(&identity(), &data).unwrap();
    assert!(matches!(
        outcome,
        ExecutionOutcome::Completed {
            batches_run: 1,
            batches_resumed: 2,
            ..
        }
    ));
    assert_eq!(second.backend().calls, vec![5_000, 5_000]);
    assert!(store.scan(&identity()).unwrap().is_empty());

    let clean_dir = tempdir().unwrap();
    executor(clean_dir.path(), ScriptedBackend::default(), 10_000)
        .run(&identity(), &data)
        .unwrap();
    assert_eq!(load_final(crash_dir.path()), load_final(clean_dir.path()));
}

#[test]
fn test_resume_picks_highest_of_two_checkpoints() {
    let data = items(30, 3);

    let dir = tempdir().unwrap();
    let err = executor(dir.path(), ScriptedBackend::failing_on(4), 10)
        .run(&identity(), &data)
        .unwrap_err();
    assert!(matches!(err, ExecutorError::Batch { index: 2, .. }));

    // A stale, empty checkpoint for batch 0 left behind next to batch 1's.
    let store = CheckpointStore::flat(dir.path());
    store
        .save(
            &CheckpointKey::batch(&identity(), BatchRange { start: 0, end: 10 }),
            &probe_exec::ResultAccumulator::default(),
        )
        .unwrap();
    assert_eq!(store.scan(&identity()).unwrap().len(), 2);

    let mut resumed = executor(dir.path(), ScriptedBackend::default(), 10);
    resumed.run(&identity(), &data).unwrap();
    let batch_two_prompts: usize = data[20..].iter().map(|i| i.variant_count()).sum();
    assert_eq!(
        resumed.backend().calls,
        vec![batch_two_prompts, batch_two_prompts]
    );
    assert!(store.scan(&identity()).unwrap().is_empty());

    let clean = tempdir().unwrap();
    executor(clean.path(), ScriptedBackend::default(), 10)
        .run(&identity(), &data)
        .unwrap();
    assert_eq!(load_final(dir.path()), load_final(clean.path()));
}

#[test]
fn test_missing_key_aborts_and_keeps_checkpoints() {
    let data = items(20, 2);

    // Results for batch 0 with one key dropped, saved as batch 0's checkpoint.
    let scratch = tempdir().unwrap();
    executor(scratch.path(), ScriptedBackend::default(), 10)
        .run(&identity(), &data[..10])
        .unwrap();
    let mut partial = load_final(scratch.path());
    let dropped = PairKey::new("Q3", "Q1000003");
    assert!(partial.forward.remove(&dropped).is_some());
    assert!(partial.backward.remove(&dropped).is_some());

    let dir = tempdir().unwrap();
    let store = CheckpointStore::flat(dir.path());
    store
        .save(
            &CheckpointKey::batch(&identity(), BatchRange { start: 0, end: 10 }),
            &partial,
        )
        .unwrap();

    let err = executor(dir.path(), ScriptedBackend::default(), 10)
        .run(&identity(), &data)
        .unwrap_err();
    let ExecutorError::Integrity(integrity) = err else {
        panic!("expected integrity failure");
    };
    assert_eq!(integrity.report.missing, vec![dropped]);
    assert!(integrity.report.extra.is_empty());

    assert!(!store.exists(&CheckpointKey::final_result(&identity())));
    let left: Vec<_> = store.scan(&identity()).unwrap();
    assert_eq!(left.len(), 1);
    assert!(
        left[0]
            .1
            .to_string_lossy()
            .contains("_incomplete_10_to_20.json")
    );
}

#[test]
fn test_extra_key_aborts_and_keeps_checkpoints() {
    let data = items(20, 2);

    // Batch 0's results plus a pair the dataset never produced.
    let scratch = tempdir().unwrap();
    executor(scratch.path(), ScriptedBackend::default(), 10)
        .run(&identity(), &data[..10])
        .unwrap();
    let mut polluted = load_final(scratch.path());
    let stray = PairKey::new("Q999", "Q1");
    polluted.forward.insert(stray.clone(), ProbeResult::default());
    polluted.backward.insert(stray.clone(), ProbeResult::default());

    let dir = tempdir().unwrap();
    let store = CheckpointStore::flat(dir.path());
    store
        .save(
            &CheckpointKey::batch(&identity(), BatchRange { start: 0, end: 10 }),
            &polluted,
        )
        .unwrap();

    let err = executor(dir.path(), ScriptedBackend::default(), 10)
        .run(&identity(), &data)
        .unwrap_err();
    let ExecutorError::Integrity(integrity) = err else {
        panic!("expected integrity failure");
    };
    assert!(integrity.report.missing.is_empty());
    assert_eq!(integrity.report.extra, vec![stray]);

    assert!(!store.exists(&CheckpointKey::final_result(&identity())));
    let left: Vec<_> = store.scan(&identity()).unwrap();
    assert_eq!(left.len(), 1);
    assert!(
        left[0]
            .1
            .to_string_lossy()
            .contains("_incomplete_10_to_20.json")
    );
}

#[test]
fn test_models_sharing_a_config_keep_separate_results() {
    let root = tempdir().unwrap();
    let config_path = root.path().join("qa.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"
relation = "P19"
model = "org/a"
count_high = 1000
count_low = 10
template_forward = "Was {{subject}} {{predicate}} {{object}}?"
template_backward = "Is {{object}} {{predicate}} {{subject}}?"
relation_forward = "born in"
relation_backward = "the birthplace of"
output_dir = "{}"
"#,
            root.path().join("experiments").display()
        ),
    )
    .unwrap();

    let data = items(12, 2);
    let mut finals = Vec::new();
    for model in ["org/a", "org/b"] {
        let mut config = ProbeConfig::load(&config_path).unwrap();
        config.model = model.to_string();

        let mut exec = executor(&config.result_dir(false), ScriptedBackend::default(), 5);
        let outcome = exec.run(&identity(), &data).unwrap();
        let ExecutionOutcome::Completed { path, .. } = outcome else {
            panic!("{model} was skipped");
        };
        assert!(!exec.backend().calls.is_empty());
        finals.push(path);
    }

    assert_ne!(finals[0], finals[1]);
    assert!(finals.iter().all(|p| p.exists()));
    assert!(finals[0].to_string_lossy().contains("org_a"));
    assert!(finals[1].to_string_lossy().contains("org_b"));
}

#[test]
fn test_final_covers_every_expected_key() {
    let mut data = items(40, 3);
    data[5].subject_names.clear();

    let dir = tempdir().unwrap();
    executor(dir.path(), ScriptedBackend::default(), 7)
        .run(&identity(), &data)
        .unwrap();

    let acc = load_final(dir.path());
    let expected = expected_keys(&data);
    assert_eq!(expected.len(), 39);
    assert_eq!(acc.keys(), expected);
    assert!(acc.forward.keys().eq(acc.backward.keys()));
}
