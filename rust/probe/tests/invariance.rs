//! Final results must not depend on how the dataset is split into batches.

mod common;

use common::{ScriptedBackend, executor, identity, items, load_final};
use tempfile::tempdir;

#[test]
fn test_batch_size_does_not_change_results() {
    let mut data = items(57, 4);
    // Same key twice, far apart: the later item must win under every split.
    let mut repeat = data[2].clone();
    repeat.subject_names = vec!["someone else".into()];
    data.push(repeat);

    let reference_dir = tempdir().unwrap();
    executor(reference_dir.path(), ScriptedBackend::default(), data.len())
        .run(&identity(), &data)
        .unwrap();
    let reference = load_final(reference_dir.path());
    assert_eq!(reference.forward[&data[2].key()].text.len(), 1);

    for batch_size in [1, 2, 7, 10, 57, 1000] {
        let dir = tempdir().unwrap();
        executor(dir.path(), ScriptedBackend::default(), batch_size)
            .run(&identity(), &data)
            .unwrap();
        assert_eq!(
            load_final(dir.path()),
            reference,
            "batch size {batch_size} changed the results"
        );
    }
}
