use super::*;

#[test]
fn missing_fragment_is_not_found() {
    let s = TestSrv::new();
    let peer = TestPeer::new();

    let res = peer.retrieve(&s, &content_address(b"never stored"), &[]);
    assert_eq!(404, res.status);
    assert!(res.text().contains("NotFound"), "{}", res.text());
}

#[test]
fn standalone_metadata_is_per_owner() {
    let s = TestSrv::new();
    let a = TestPeer::new();
    let b = TestPeer::new();
    let data = vec![3; 10_000];
    let key = content_address(&data);
    let meta = b64(b"meta of a");

    let res = a.store(&s, &data, &[("metakey", "a"), ("meta", meta.as_str())]);
    assert_eq!(200, res.status, "{}", res.text());
    assert_eq!(200, b.store(&s, &data, &[]).status);

    let res = a.retrieve(&s, &key, &[]);
    assert_eq!(200, res.status);
    assert_eq!(
        vec![
            (format!("{key}.a.meta"), b"meta of a".to_vec()),
            (key.clone(), data.clone()),
        ],
        res.parts()
    );

    let res = a.retrieve(&s, &key, &[("withMeta", "false")]);
    assert_eq!(Some("application/octet-stream"), res.header("content-type"));
    assert_eq!(data, res.body);

    // b attached nothing
    let res = b.retrieve(&s, &key, &[]);
    assert_eq!(Some("application/octet-stream"), res.header("content-type"));
    assert_eq!(data, res.body);
}

#[test]
fn packed_fragment_comes_with_its_metadata() {
    let s = TestSrv::new();
    let peer = TestPeer::new();
    let data = b"packed payload";
    let key = content_address(data);
    let (ma, mb) = (format!("{key}.a.meta"), format!("{key}.b.meta"));

    let bundle = tar_of(&[
        (key.as_str(), &data[..]),
        (ma.as_str(), &b"first"[..]),
        (mb.as_str(), &b"second"[..]),
    ]);
    assert_eq!(200, peer.store_as(&s, "bundle.tar", &bundle, &[]).status);

    let res = peer.retrieve(&s, &key, &[]);
    assert_eq!(200, res.status, "{}", res.text());
    assert_eq!(
        vec![
            (ma, b"first".to_vec()),
            (mb, b"second".to_vec()),
            (key.clone(), data.to_vec()),
        ],
        res.parts()
    );

    let res = peer.retrieve(&s, &key, &[("withMeta", "false")]);
    assert_eq!(data.to_vec(), res.body);
}

#[test]
fn compressed_container_is_searched_first() {
    let s = TestSrv::new();
    let peer = TestPeer::new();
    let data = b"in both containers";
    let key = content_address(data);
    let meta = format!("{key}.m.meta");

    let plain = tar_of(&[
        (key.as_str(), &data[..]),
        (meta.as_str(), &b"plain"[..]),
    ]);
    assert_eq!(200, peer.store_as(&s, "p.tar", &plain, &[]).status);
    let packed = gzip(&tar_of(&[
        (key.as_str(), &data[..]),
        (meta.as_str(), &b"gzip"[..]),
    ]));
    assert_eq!(200, peer.store_as(&s, "g.tar.gz", &packed, &[]).status);

    assert_eq!(
        vec![(meta, b"gzip".to_vec()), (key.clone(), data.to_vec())],
        peer.retrieve(&s, &key, &[]).parts()
    );
}

#[test]
fn containers_are_private_to_their_owner() {
    let s = TestSrv::new();
    let owner = TestPeer::new();
    let other = TestPeer::new();
    let data = b"mine";
    let key = content_address(data);

    let bundle = tar_of(&[(key.as_str(), &data[..])]);
    assert_eq!(200, owner.store_as(&s, "bundle.tar", &bundle, &[]).status);

    assert_eq!(data.to_vec(), owner.retrieve(&s, &key, &[]).body);
    assert_eq!(404, other.retrieve(&s, &key, &[]).status);
}

#[test]
fn bad_flag_is_malformed() {
    let s = TestSrv::new();
    let peer = TestPeer::new();

    let res = peer.bare(
        &s,
        "GET",
        &format!("/file/{UNSTORED_KEY}"),
        &[("withMeta", "maybe")],
        b"",
    );
    assert_eq!(400, res.status);
    assert!(res.text().contains("withMeta"), "{}", res.text());
}
