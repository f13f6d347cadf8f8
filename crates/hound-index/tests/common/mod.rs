use hound_index::{IndexReader, IndexWriter};
use std::path::Path;

/// Build a committed generation at `dir` from (path, content) pairs and open
/// it. Paths must arrive pre-sorted when FileId order matters to the test.
pub fn build_reader(dir: &Path, files: &[(&str, &str)]) -> IndexReader {
    let mut w = IndexWriter::begin(dir, 1, 1 << 20).expect("begin writer");
    for (path, content) in files {
        w.add_file(path, content.as_bytes(), 0).expect("add file");
    }
    w.finish().expect("finish");
    IndexReader::open(dir).expect("open")
}
