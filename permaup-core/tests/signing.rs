use permaup_core::chunk::ChunkSource;
use permaup_core::tx::{
    ContentRef, Tags, Transaction, CONTENT_TYPE_KEY, IPFS_CONSTRAINT, IPFS_CONSTRAINT_KEY, IPFS_KEY,
};
use permaup_core::wallet::Wallet;
use permaup_core::Error;
use proptest::prelude::*;

fn content(data: &[u8], chunk_size: u32) -> ContentRef {
    let mut src = ChunkSource::from_bytes("mem", data.to_vec());
    ContentRef::from_source(&mut src, chunk_size).unwrap()
}

#[test]
fn signing_twice_gives_same_id_and_signature() {
    let w = Wallet::from_seed([42u8; 32]);
    let tags = Tags::for_upload(Some("image/png"), Some("QmXYZ"));
    let a = Transaction::build(&w, tags.clone(), content(b"hello world", 4)).sign(&w).unwrap();
    let b = Transaction::build(&w, tags, content(b"hello world", 4)).sign(&w).unwrap();
    assert_eq!(a.id(), b.id());
    assert_eq!(a.signature(), b.signature());
    assert!(a.verify());
}

#[test]
fn resigning_fails_with_already_signed() {
    let w = Wallet::from_seed([1u8; 32]);
    let signed = Transaction::build(&w, Tags::for_upload(None, None), content(b"x", 4))
        .sign(&w)
        .unwrap();
    assert!(matches!(signed.sign(&w), Err(Error::AlreadySigned)));
    let mut frozen = signed.clone();
    assert!(matches!(frozen.add_tag("k", "v"), Err(Error::AlreadySigned)));
    assert_eq!(frozen.tags(), signed.tags());
}

#[test]
fn foreign_wallet_cannot_sign() {
    let owner = Wallet::from_seed([1u8; 32]);
    let other = Wallet::from_seed([2u8; 32]);
    let tx = Transaction::build(&owner, Tags::for_upload(None, None), content(b"x", 4));
    assert!(matches!(tx.sign(&other), Err(Error::Signing(_))));
    assert!(!tx.is_signed());
}

#[test]
fn tag_order_changes_the_id() {
    let w = Wallet::from_seed([9u8; 32]);
    let mut ab = Tags::new();
    ab.push("a", "1");
    ab.push("b", "2");
    let mut ba = Tags::new();
    ba.push("b", "2");
    ba.push("a", "1");
    let x = Transaction::build(&w, ab, content(b"same", 4)).sign(&w).unwrap();
    let y = Transaction::build(&w, ba, content(b"same", 4)).sign(&w).unwrap();
    assert_ne!(x.id(), y.id());
}

#[test]
fn content_changes_the_id() {
    let w = Wallet::from_seed([9u8; 32]);
    let tags = Tags::for_upload(Some("text/plain"), None);
    let x = Transaction::build(&w, tags.clone(), content(b"one", 4)).sign(&w).unwrap();
    let y = Transaction::build(&w, tags, content(b"two", 4)).sign(&w).unwrap();
    assert_ne!(x.id(), y.id());
}

#[test]
fn header_carries_tags_in_order() {
    let w = Wallet::from_seed([5u8; 32]);
    let tx = Transaction::build(&w, Tags::for_upload(Some("image/png"), Some("QmXYZ")), content(b"abc", 2))
        .sign(&w)
        .unwrap();
    let h = tx.header().unwrap();
    assert_eq!(h.id, tx.id().unwrap());
    assert_eq!(h.data_size, "3");
    let pairs: Vec<(&str, &str)> = h.tags.iter().map(|t| (t.name.as_str(), t.value.as_str())).collect();
    assert_eq!(
        pairs,
        vec![(CONTENT_TYPE_KEY, "image/png"), (IPFS_KEY, "QmXYZ"), (IPFS_CONSTRAINT_KEY, IPFS_CONSTRAINT)]
    );
}

proptest! {
    #[test]
    fn ipfs_tag_iff_constraint_tag(mime in proptest::option::of("[a-z]{1,8}/[a-z]{1,8}"),
                                   ipfs in proptest::option::of("[ -~]{0,12}")) {
        let tags = Tags::for_upload(mime.as_deref(), ipfs.as_deref());
        prop_assert_eq!(tags.get(IPFS_KEY).is_some(), tags.get(IPFS_CONSTRAINT_KEY).is_some());
        prop_assert!(tags.get(CONTENT_TYPE_KEY).is_some());
    }

    #[test]
    fn signing_is_deterministic(seed in any::<[u8; 32]>(),
                                data in proptest::collection::vec(any::<u8>(), 0..2048),
                                values in proptest::collection::vec("[a-z0-9]{0,6}", 0..4)) {
        let w = Wallet::from_seed(seed);
        let mut tags = Tags::new();
        for v in &values {
            tags.push("k", v);
        }
        let a = Transaction::build(&w, tags.clone(), content(&data, 256)).sign(&w).unwrap();
        let b = Transaction::build(&w, tags, content(&data, 256)).sign(&w).unwrap();
        prop_assert_eq!(a.id(), b.id());
        prop_assert_eq!(a.signature(), b.signature());
    }
}
