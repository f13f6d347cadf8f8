mod common;

use common::build_reader;
use hound_index::{lower, IndexSearcher, LineMatch, ScanOpts};

fn scan(
    files: &[(&str, &str)],
    pattern: &str,
    ignore_case: bool,
    opts: &ScanOpts,
) -> Vec<(String, Vec<LineMatch>)> {
    let tmp = tempfile::tempdir().unwrap();
    let rdr = build_reader(&tmp.path().join("gen"), files);
    let searcher = IndexSearcher::new(&rdr);
    let expr = lower(pattern, ignore_case);
    let re = regex::bytes::RegexBuilder::new(pattern)
        .case_insensitive(ignore_case)
        .build()
        .unwrap();
    let mut out = Vec::new();
    for id in searcher.candidates(&expr, None) {
        let scan = searcher.confirm(id, &re, opts).unwrap();
        if !scan.matches.is_empty() {
            out.push((rdr.path(id).unwrap().to_string(), scan.matches));
        }
    }
    out
}

#[test]
fn literal_match() {
    let corpus = &[("a.txt", "hello world"), ("b.txt", "goodbye")];
    let hits = scan(corpus, "world", false, &ScanOpts::default());
    assert_eq!(hits.len(), 1);
    let (path, matches) = &hits[0];
    assert_eq!(path, "a.txt");
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].line_number, 1);
    assert_eq!((matches[0].start, matches[0].end), (6, 11));
    assert_eq!(matches[0].line, "hello world");
}

#[test]
fn short_literal_widens_but_matches() {
    // Two bytes carry no trigram constraint; the candidate set must widen to
    // every file rather than lose the match.
    let corpus = &[("a.txt", "hello world"), ("b.txt", "goodbye")];
    let hits = scan(corpus, "wo", false, &ScanOpts::default());
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].0, "a.txt");
    assert_eq!((hits[0].1[0].start, hits[0].1[0].end), (6, 8));
}

#[test]
fn alternation_in_line_order() {
    let corpus = &[("x", "foo\nbar\nbaz")];
    let hits = scan(corpus, "ba[rz]", false, &ScanOpts::default());
    assert_eq!(hits.len(), 1);
    let matches = &hits[0].1;
    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].line_number, 2);
    assert_eq!(matches[0].line, "bar");
    assert_eq!(matches[1].line_number, 3);
    assert_eq!(matches[1].line, "baz");
}

#[test]
fn context_lines_captured() {
    let corpus = &[("x", "one\ntwo\nthree\nfour\nfive\n")];
    let opts = ScanOpts {
        context_lines: 2,
        max_matches_per_file: 0,
    };
    let hits = scan(corpus, "three", false, &opts);
    let m = &hits[0].1[0];
    assert_eq!(m.line_number, 3);
    assert_eq!(m.before, vec!["one", "two"]);
    assert_eq!(m.after, vec!["four", "five"]);

    // At the top of the file the window shrinks instead of wrapping.
    let hits = scan(corpus, "one", false, &opts);
    let m = &hits[0].1[0];
    assert!(m.before.is_empty());
    assert_eq!(m.after, vec!["two", "three"]);
}

#[test]
fn per_file_cap_truncates() {
    let body = "x\n".repeat(50);
    let corpus = &[("x", body.as_str())];
    let tmp = tempfile::tempdir().unwrap();
    let rdr = build_reader(&tmp.path().join("gen"), corpus);
    let searcher = IndexSearcher::new(&rdr);
    let re = regex::bytes::Regex::new("x").unwrap();
    let opts = ScanOpts {
        context_lines: 0,
        max_matches_per_file: 10,
    };
    let scan = searcher.confirm(0, &re, &opts).unwrap();
    assert_eq!(scan.matches.len(), 10);
    assert!(scan.truncated);
}

#[test]
fn candidate_superset_property() {
    let corpus: &[(&str, &str)] = &[
        ("a.rs", "fn alpha() { beta(); }\n"),
        ("b.rs", "static BETA: u32 = 7;\n"),
        ("c.txt", "nothing interesting here\n"),
        ("d.txt", "alphabet soup\n"),
    ];
    let tmp = tempfile::tempdir().unwrap();
    let rdr = build_reader(&tmp.path().join("gen"), corpus);
    let searcher = IndexSearcher::new(&rdr);

    for (pattern, ignore_case) in [
        ("alpha", false),
        ("alpha|beta", false),
        ("beta", true),
        (r"al.ha", false),
        (r"\bBETA\b", false),
        ("so+up", false),
    ] {
        let expr = lower(pattern, ignore_case);
        let candidates = searcher.candidates(&expr, None);
        let re = regex::bytes::RegexBuilder::new(pattern)
            .case_insensitive(ignore_case)
            .build()
            .unwrap();
        for (id, (_, content)) in corpus.iter().enumerate() {
            if re.is_match(content.as_bytes()) {
                assert!(
                    candidates.contains(&(id as u32)),
                    "pattern {:?}: matching file {} missing from candidates",
                    pattern,
                    id
                );
            }
        }
    }
}

#[test]
fn case_insensitive_is_superset() {
    let corpus = &[("a", "Hello World\n"), ("b", "hello world\n"), ("c", "HELLO\n")];
    let sensitive = scan(corpus, "hello", false, &ScanOpts::default());
    let insensitive = scan(corpus, "hello", true, &ScanOpts::default());
    let s_paths: Vec<_> = sensitive.iter().map(|(p, _)| p.clone()).collect();
    let i_paths: Vec<_> = insensitive.iter().map(|(p, _)| p.clone()).collect();
    for p in &s_paths {
        assert!(i_paths.contains(p));
    }
    assert_eq!(s_paths, vec!["b"]);
    assert_eq!(i_paths, vec!["a", "b", "c"]);
}

#[test]
fn path_filter_intersects_candidates() {
    let corpus = &[
        ("src/a.rs", "needle\n"),
        ("docs/a.md", "needle\n"),
        ("src/b.rs", "hay\n"),
    ];
    let tmp = tempfile::tempdir().unwrap();
    let rdr = build_reader(&tmp.path().join("gen"), corpus);
    let searcher = IndexSearcher::new(&rdr);
    let expr = lower("needle", false);
    let path_re = regex::Regex::new(r"\.rs$").unwrap();
    let ids = searcher.candidates(&expr, Some(&path_re));
    let paths: Vec<_> = ids.iter().map(|&id| rdr.path(id).unwrap()).collect();
    assert_eq!(paths, vec!["src/a.rs"]);
}

#[test]
fn match_record_serializes() {
    let corpus = &[("a.txt", "hello world")];
    let hits = scan(corpus, "world", false, &ScanOpts::default());
    let json = serde_json::to_value(&hits[0].1[0]).unwrap();
    assert_eq!(json["line_number"], 1);
    assert_eq!(json["line"], "hello world");
}
