use drive_fs::RelPath;
use rstest::rstest;
use std::path::Path;

#[rstest]
#[case("foo/bar/baz", "foo/bar/baz")]
#[case("foo\\bar\\baz", "foo/bar/baz")]
#[case("foo/bar\\baz", "foo/bar/baz")]
#[case("./foo//bar/", "foo/bar")]
#[case("", "")]
#[case(".", "")]
fn test_normalization(#[case] input: &str, #[case] expected: &str) {
    assert_eq!(RelPath::new(input).unwrap().as_str(), expected);
}

#[rstest]
#[case("../outside")]
#[case("a/../../b")]
#[case("/absolute")]
fn test_rejects_escaping_paths(#[case] input: &str) {
    assert!(RelPath::new(input).is_err());
}

#[test]
fn test_from_native_strips_root() {
    let root = Path::new("/home/user/drive");
    let rel = RelPath::from_native(root, &root.join("a").join("b.txt")).unwrap();
    assert_eq!(rel.as_str(), "a/b.txt");
}

#[test]
fn test_from_native_root_itself() {
    let root = Path::new("/home/user/drive");
    assert!(RelPath::from_native(root, root).unwrap().is_root());
}

#[test]
fn test_from_native_outside_root() {
    let root = Path::new("/home/user/drive");
    assert!(RelPath::from_native(root, Path::new("/etc/passwd")).is_err());
}

#[cfg(unix)]
#[test]
fn test_from_native_rejects_non_utf8_name() {
    use std::os::unix::ffi::OsStrExt;

    let root = Path::new("/home/user/drive");
    let path = root.join(std::ffi::OsStr::from_bytes(b"caf\xe9.txt"));

    let err = RelPath::from_native(root, &path).unwrap_err();
    assert!(matches!(err, drive_fs::Error::InvalidPath { .. }), "{err}");
}

#[test]
fn test_parent_chain() {
    let path = RelPath::new("a/b/c.txt").unwrap();
    let parent = path.parent().unwrap();
    assert_eq!(parent.as_str(), "a/b");
    assert_eq!(parent.parent().unwrap().as_str(), "a");
    assert!(parent.parent().unwrap().parent().unwrap().is_root());
}

#[test]
fn test_join_from_root() {
    let joined = RelPath::root().join("a").unwrap().join("b.txt").unwrap();
    assert_eq!(joined.as_str(), "a/b.txt");
}

#[test]
fn test_rebase_moves_subtree() {
    let file = RelPath::new("old/dir/file.txt").unwrap();
    let from = RelPath::new("old").unwrap();
    let to = RelPath::new("new/place").unwrap();
    assert_eq!(
        file.rebase(&from, &to).unwrap().as_str(),
        "new/place/dir/file.txt"
    );
    assert_eq!(from.rebase(&from, &to).unwrap(), to);
}

#[test]
fn test_rebase_unrelated_path_is_none() {
    let file = RelPath::new("other/file.txt").unwrap();
    let from = RelPath::new("old").unwrap();
    assert!(file.rebase(&from, &RelPath::root()).is_none());
}

#[test]
fn test_to_native_joins_segments() {
    let root = Path::new("/data");
    let native = RelPath::new("a/b.txt").unwrap().to_native(root);
    assert_eq!(native, root.join("a").join("b.txt"));
}

#[test]
fn test_ordering_is_lexicographic() {
    let mut paths = vec![
        RelPath::new("b").unwrap(),
        RelPath::new("a/z").unwrap(),
        RelPath::new("a").unwrap(),
    ];
    paths.sort();
    let sorted: Vec<&str> = paths.iter().map(|p| p.as_str()).collect();
    assert_eq!(sorted, vec!["a", "a/z", "b"]);
}
