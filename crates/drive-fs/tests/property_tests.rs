use drive_fs::RelPath;
use proptest::prelude::*;

proptest! {
    #[test]
    fn test_normalization_invariants(segments in prop::collection::vec("[a-zA-Z0-9 _.-]{0,8}", 0..6)) {
        let raw = segments.join("/");
        let Ok(path) = RelPath::new(&raw) else {
            // Only a literal ".." segment or a leading slash may be rejected
            prop_assert!(segments.iter().any(|s| s == "..") || raw.starts_with('/'));
            return Ok(());
        };
        let as_str = path.as_str();

        prop_assert!(!as_str.contains('\\'));
        prop_assert!(!as_str.contains("//"));
        prop_assert!(!as_str.starts_with('/'));
        prop_assert!(!as_str.ends_with('/'));
        prop_assert!(path.segments().all(|s| s != "." && s != ".."));

        // Normalizing twice is a no-op
        prop_assert_eq!(RelPath::new(as_str).unwrap(), path.clone());
    }

    #[test]
    fn test_parent_join_roundtrip(segments in prop::collection::vec("[a-z]{1,6}", 1..6)) {
        let path = RelPath::new(&segments.join("/")).unwrap();
        let parent = path.parent().unwrap();
        let name = path.file_name().unwrap();

        prop_assert_eq!(parent.join(name).unwrap(), path.clone());
        prop_assert!(path.starts_with(&parent));
        prop_assert_eq!(path.depth(), parent.depth() + 1);
    }
}
