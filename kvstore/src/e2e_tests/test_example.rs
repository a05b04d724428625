//! The basic insert/read/delete walkthrough.

use super::helpers::TestDb;

#[test]
fn test_insert_read_delete_walkthrough() {
    let mut t = TestDb::new();

    t.db.set(b"1", b"1").expect("set 1");
    t.db.set(b"2", b"2").expect("set 2");

    assert_eq!(t.db.get(b"1").expect("get"), Some(b"1".to_vec()));
    assert_eq!(t.db.get(b"3").expect("get"), None);

    assert!(t.db.delete(b"1").expect("delete"));
    assert_eq!(t.db.get(b"1").expect("get"), None);
    assert_eq!(t.db.get(b"2").expect("get"), Some(b"2".to_vec()));

    t.reopen();
    assert_eq!(t.db.get(b"1").expect("get"), None);
    assert_eq!(t.db.get(b"2").expect("get"), Some(b"2".to_vec()));
    assert_eq!(t.db.count().expect("count"), 1);
}
