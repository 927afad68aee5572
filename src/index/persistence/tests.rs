use super::*;
use crate::providers::ProviderKind;
use tempfile::TempDir;

fn space(model: &str) -> EmbeddingSpace {
    EmbeddingSpace {
        provider: ProviderKind::Ollama,
        model: model.to_string(),
    }
}

fn paths_in(dir: &Path) -> IndexPaths {
    IndexPaths {
        vectors: dir.join("index").join("vectors.bin"),
        metadata: dir.join("index").join("metadata.json"),
    }
}

fn sample_index() -> VectorIndex {
    let mut index = VectorIndex::new(space("nomic-embed-text"));
    index
        .insert(
            vec![1.0, 0.0, 0.0],
            CodeFragment::whole_file("a.py", "def add(a, b):\n    return a + b\n"),
        )
        .expect("insert should succeed");
    index
        .insert(
            vec![0.0, 3.0, 4.0],
            CodeFragment::whole_file("b.py", "def sub(a, b):\n    return a - b\n"),
        )
        .expect("insert should succeed");
    index
}

fn other_build_of_same_shape() -> VectorIndex {
    let mut index = VectorIndex::new(space("nomic-embed-text"));
    index
        .insert(vec![0.0, 0.0, 1.0], CodeFragment::whole_file("x.py", "X = 1\n"))
        .expect("insert should succeed");
    index
        .insert(vec![0.0, 1.0, 0.0], CodeFragment::whole_file("y.py", "Y = 2\n"))
        .expect("insert should succeed");
    index
}

#[test]
fn persist_then_load_restores_entries() {
    let temp_dir = TempDir::new().expect("should create TempDir");
    let paths = paths_in(temp_dir.path());
    let index = sample_index();

    index.persist(&paths).expect("persist should succeed");
    assert!(paths.exist());

    let loaded = VectorIndex::load(&paths, index.space(), Some(3)).expect("load should succeed");
    assert_eq!(loaded.entries(), index.entries());
    assert_eq!(loaded.dimension(), Some(3));

    let original = index.search(&[0.0, 1.0, 1.0], 2).expect("search should succeed");
    let restored = loaded.search(&[0.0, 1.0, 1.0], 2).expect("search should succeed");
    assert_eq!(original, restored);
}

#[test]
fn loaded_index_continues_id_sequence() {
    let temp_dir = TempDir::new().expect("should create TempDir");
    let paths = paths_in(temp_dir.path());
    sample_index().persist(&paths).expect("persist should succeed");

    let mut loaded =
        VectorIndex::load(&paths, &space("nomic-embed-text"), None).expect("load should succeed");
    let id = loaded
        .insert(vec![0.5, 0.5, 0.0], CodeFragment::whole_file("c.py", "pass\n"))
        .expect("insert should succeed");
    assert_eq!(id, 2);
}

#[test]
fn vectors_file_layout() {
    let temp_dir = TempDir::new().expect("should create TempDir");
    let paths = paths_in(temp_dir.path());
    sample_index().persist(&paths).expect("persist should succeed");

    let bytes = fs::read(&paths.vectors).expect("should read vectors file");
    assert_eq!(&bytes[..8], b"CRAGVEC2");
    assert_eq!(u32::from_le_bytes(bytes[8..12].try_into().expect("4 bytes")), 3);
    assert_eq!(u64::from_le_bytes(bytes[12..20].try_into().expect("8 bytes")), 2);
    let header = VectorIndex::read_header(&paths).expect("header should load");
    assert_eq!(
        u64::from_le_bytes(bytes[20..28].try_into().expect("8 bytes")),
        header.build_id
    );
    assert_eq!(bytes.len(), 28 + 2 * (8 + 3 * 4));
    assert!(!paths.vectors.with_file_name("vectors.bin.tmp").exists());
}

#[test]
fn header_is_readable_on_its_own() {
    let temp_dir = TempDir::new().expect("should create TempDir");
    let paths = paths_in(temp_dir.path());
    sample_index().persist(&paths).expect("persist should succeed");

    let header = VectorIndex::read_header(&paths).expect("header should load");
    assert_eq!(header.format_version, 2);
    assert_eq!(header.space, space("nomic-embed-text"));
    assert_eq!(header.dimension, Some(3));
    assert_eq!(header.entry_count, 2);
    assert_eq!(header.watched_dir, None);
}

#[test]
fn empty_index_round_trips() {
    let temp_dir = TempDir::new().expect("should create TempDir");
    let paths = paths_in(temp_dir.path());
    VectorIndex::new(space("nomic-embed-text"))
        .persist(&paths)
        .expect("persist should succeed");

    let loaded = VectorIndex::load(&paths, &space("nomic-embed-text"), Some(768))
        .expect("load should succeed");
    assert!(loaded.is_empty());
    assert_eq!(loaded.dimension(), None);
}

#[test]
fn missing_files_are_unavailable() {
    let temp_dir = TempDir::new().expect("should create TempDir");
    let paths = paths_in(temp_dir.path());

    let result = VectorIndex::load(&paths, &space("nomic-embed-text"), None);
    assert!(matches!(result, Err(CodeRagError::IndexUnavailable(_))));

    sample_index().persist(&paths).expect("persist should succeed");
    fs::remove_file(&paths.vectors).expect("should remove vectors file");
    let result = VectorIndex::load(&paths, &space("nomic-embed-text"), None);
    assert!(matches!(result, Err(CodeRagError::IndexUnavailable(_))));
}

#[test]
fn other_embedding_model_is_rejected() {
    let temp_dir = TempDir::new().expect("should create TempDir");
    let paths = paths_in(temp_dir.path());
    sample_index().persist(&paths).expect("persist should succeed");

    let result = VectorIndex::load(&paths, &space("mxbai-embed-large"), None);
    match result {
        Err(CodeRagError::IndexUnavailable(message)) => {
            assert!(message.contains("ollama/nomic-embed-text"), "{message}");
        }
        other => panic!("expected IndexUnavailable, got {other:?}"),
    }
}

#[test]
fn expected_dimension_must_match() {
    let temp_dir = TempDir::new().expect("should create TempDir");
    let paths = paths_in(temp_dir.path());
    sample_index().persist(&paths).expect("persist should succeed");

    let result = VectorIndex::load(&paths, &space("nomic-embed-text"), Some(1536));
    assert!(matches!(
        result,
        Err(CodeRagError::DimensionMismatch {
            expected: 3,
            actual: 1536
        })
    ));
}

#[test]
fn corrupt_vector_file_is_unavailable() {
    let temp_dir = TempDir::new().expect("should create TempDir");
    let paths = paths_in(temp_dir.path());
    sample_index().persist(&paths).expect("persist should succeed");

    let mut bytes = fs::read(&paths.vectors).expect("should read vectors file");
    bytes[0] = b'X';
    fs::write(&paths.vectors, &bytes).expect("should write vectors file");
    let result = VectorIndex::load(&paths, &space("nomic-embed-text"), None);
    assert!(matches!(result, Err(CodeRagError::IndexUnavailable(m)) if m.contains("bad magic")));

    bytes[0] = b'C';
    bytes.truncate(bytes.len() - 2);
    fs::write(&paths.vectors, &bytes).expect("should write vectors file");
    let result = VectorIndex::load(&paths, &space("nomic-embed-text"), None);
    assert!(matches!(result, Err(CodeRagError::IndexUnavailable(m)) if m.contains("truncated")));
}

#[test]
fn entry_count_disagreement_is_unavailable() {
    let temp_dir = TempDir::new().expect("should create TempDir");
    let paths = paths_in(temp_dir.path());
    sample_index().persist(&paths).expect("persist should succeed");

    let mut smaller = VectorIndex::new(space("nomic-embed-text"));
    smaller
        .insert(vec![1.0, 0.0, 0.0], CodeFragment::whole_file("a.py", "x\n"))
        .expect("insert should succeed");
    let other = paths_in(&temp_dir.path().join("other"));
    smaller.persist(&other).expect("persist should succeed");
    fs::copy(&other.metadata, &paths.metadata).expect("should copy metadata");

    let result = VectorIndex::load(&paths, &space("nomic-embed-text"), None);
    assert!(matches!(result, Err(CodeRagError::IndexUnavailable(m)) if m.contains("entries")));
}

#[test]
fn id_disagreement_is_unavailable() {
    let temp_dir = TempDir::new().expect("should create TempDir");
    let paths = paths_in(temp_dir.path());
    sample_index().persist(&paths).expect("persist should succeed");

    let mut bytes = fs::read(&paths.vectors).expect("should read vectors file");
    bytes[28..36].copy_from_slice(&7u64.to_le_bytes());
    fs::write(&paths.vectors, &bytes).expect("should write vectors file");

    let result = VectorIndex::load(&paths, &space("nomic-embed-text"), None);
    assert!(
        matches!(result, Err(CodeRagError::IndexUnavailable(m)) if m.contains("does not match"))
    );
}

#[test]
fn remove_deletes_both_files() {
    let temp_dir = TempDir::new().expect("should create TempDir");
    let paths = paths_in(temp_dir.path());
    sample_index().persist(&paths).expect("persist should succeed");

    paths.remove().expect("remove should succeed");
    assert!(!paths.vectors.exists());
    assert!(!paths.metadata.exists());
    paths.remove().expect("removing twice should succeed");
}

#[test]
fn forged_dimension_is_unavailable() {
    let temp_dir = TempDir::new().expect("should create TempDir");
    let paths = paths_in(temp_dir.path());
    sample_index().persist(&paths).expect("persist should succeed");

    let mut bytes = fs::read(&paths.vectors).expect("should read vectors file");
    bytes[8..12].copy_from_slice(&u32::MAX.to_le_bytes());
    fs::write(&paths.vectors, &bytes).expect("should write vectors file");
    let result = VectorIndex::load(&paths, &space("nomic-embed-text"), None);
    assert!(matches!(result, Err(CodeRagError::IndexUnavailable(m)) if m.contains("truncated")));

    bytes[8..12].copy_from_slice(&3u32.to_le_bytes());
    bytes[12..20].copy_from_slice(&u64::MAX.to_le_bytes());
    fs::write(&paths.vectors, &bytes).expect("should write vectors file");
    let result = VectorIndex::load(&paths, &space("nomic-embed-text"), None);
    assert!(matches!(result, Err(CodeRagError::IndexUnavailable(m)) if m.contains("overflow")));
}

#[test]
fn trailing_bytes_are_unavailable() {
    let temp_dir = TempDir::new().expect("should create TempDir");
    let paths = paths_in(temp_dir.path());
    sample_index().persist(&paths).expect("persist should succeed");

    let mut bytes = fs::read(&paths.vectors).expect("should read vectors file");
    bytes.extend_from_slice(&[0, 0, 0, 0]);
    fs::write(&paths.vectors, &bytes).expect("should write vectors file");
    let result = VectorIndex::load(&paths, &space("nomic-embed-text"), None);
    assert!(matches!(result, Err(CodeRagError::IndexUnavailable(m)) if m.contains("trailing")));
}

#[test]
fn vector_file_from_another_build_is_unavailable() {
    let temp_dir = TempDir::new().expect("should create TempDir");
    let paths = paths_in(temp_dir.path());
    sample_index().persist(&paths).expect("persist should succeed");

    let other = paths_in(&temp_dir.path().join("other"));
    other_build_of_same_shape()
        .persist(&other)
        .expect("persist should succeed");
    fs::copy(&other.vectors, &paths.vectors).expect("should copy vectors");

    let result = VectorIndex::load(&paths, &space("nomic-embed-text"), None);
    assert!(matches!(result, Err(CodeRagError::IndexUnavailable(m)) if m.contains("build")));

    fs::copy(&other.metadata, &paths.metadata).expect("should copy metadata");
    let loaded = VectorIndex::load(&paths, &space("nomic-embed-text"), None)
        .expect("matching files should load");
    assert_eq!(loaded.entries()[0].fragment.path, "x.py");
}

#[test]
fn each_persist_gets_its_own_build_id() {
    let temp_dir = TempDir::new().expect("should create TempDir");
    let paths = paths_in(temp_dir.path());
    let index = sample_index();

    index.persist(&paths).expect("persist should succeed");
    let first = VectorIndex::read_header(&paths).expect("header should load");
    index.persist(&paths).expect("persist should succeed");
    let second = VectorIndex::read_header(&paths).expect("header should load");
    assert_ne!(first.build_id, second.build_id);
}

#[test]
fn failed_write_leaves_no_temp_file() {
    let temp_dir = TempDir::new().expect("should create TempDir");
    let target = temp_dir.path().join("vectors.bin");
    fs::create_dir(&target).expect("should create directory");
    fs::write(target.join("occupied"), b"x").expect("should write file");

    let result = write_atomically(&target, b"data");
    assert!(result.is_err());
    assert!(!temp_dir.path().join("vectors.bin.tmp").exists());
    assert!(target.join("occupied").exists());
}
