use super::*;
use fragstore_archive::Compression;

fn names(c: &fragstore_archive::Container) -> Vec<String> {
    c.members().unwrap().into_iter().map(|m| m.name).collect()
}

fn files_in(s: &TestSrv) -> usize {
    std::fs::read_dir(s.dir.path()).unwrap().count()
}

#[test]
fn store_then_retrieve_standalone() {
    let s = TestSrv::new();
    let peer = TestPeer::new();
    let data = vec![0xa5; 10_000];
    let key = content_address(&data);

    let res = peer.store(&s, &data, &[]);
    assert_eq!(200, res.status, "{}", res.text());
    assert_eq!("fragment", res.json()["location"]);
    assert_eq!(data, std::fs::read(s.path(&key)).unwrap());

    let res = peer.retrieve(&s, &key, &[]);
    assert_eq!(200, res.status);
    assert_eq!(Some("application/octet-stream"), res.header("content-type"));
    assert_eq!(data, res.body);
}

#[test]
fn small_fragment_without_container_is_standalone() {
    let s = TestSrv::new();
    let peer = TestPeer::new();

    let res = peer.store(&s, b"tiny", &[]);
    assert_eq!("fragment", res.json()["location"]);
    assert!(s.path(&content_address(b"tiny")).exists());
}

#[test]
fn non_canonical_key_is_refused() {
    let s = TestSrv::new();
    let peer = TestPeer::new();

    let res = peer.store_as(&s, &content_address(b"other"), b"data", &[]);
    assert_eq!(409, res.status);
    assert!(res.text().contains("NonCanonicalKey"), "{}", res.text());

    // the upload was discarded
    assert_eq!(0, files_in(&s));
}

#[test]
fn size_must_match_body() {
    let s = TestSrv::new();
    let peer = TestPeer::new();
    let key = content_address(b"data");

    let path = format!("/file/{key}");
    let res = peer.bare(&s, "POST", &path, &[("size", "3")], b"data");
    assert_eq!(400, res.status);

    let res = peer.bare(&s, "POST", &path, &[], b"data");
    assert_eq!(400, res.status);
    assert!(res.text().contains("size"), "{}", res.text());
}

#[test]
fn second_owner_shares_the_fragment() {
    let s = TestSrv::new();
    let a = TestPeer::new();
    let b = TestPeer::new();
    let data = vec![7; 9000];
    let key = content_address(&data);

    assert_eq!(200, a.store(&s, &data, &[]).status);
    assert_eq!(200, b.store(&s, &data, &[]).status);

    // one copy of the content plus its owner record
    assert_eq!(2, files_in(&s));
    let record: serde_json::Value = serde_json::from_slice(
        &std::fs::read(s.path(&format!("{key}.owners"))).unwrap(),
    )
    .unwrap();
    assert_eq!(2, record["owners"].as_object().unwrap().len());

    assert_eq!(data, b.retrieve(&s, &key, &[]).body);
}

#[test]
fn small_fragments_pack_into_existing_container() {
    let s = TestSrv::new();
    let peer = TestPeer::new();

    let first = b"first fragment";
    let first_key = content_address(first);
    let bundle = tar_of(&[(first_key.as_str(), &first[..])]);
    let res = peer.store_as(&s, "bundle.tar", &bundle, &[]);
    assert_eq!(200, res.status, "{}", res.text());
    assert_eq!("container", res.json()["location"]);

    let c = s.container(&peer, Compression::Plain);
    assert!(c.exists());

    let small = b"small fragment";
    let key = content_address(small);
    let meta = b64(b"m");
    let res =
        peer.store(&s, small, &[("metakey", "owner"), ("meta", meta.as_str())]);
    assert_eq!(200, res.status, "{}", res.text());
    assert_eq!("container", res.json()["location"]);
    assert!(!s.path(&key).exists());
    assert_eq!(
        vec![first_key, key.clone(), format!("{key}.owner.meta")],
        names(&c)
    );

    // storing it again changes nothing
    let res = peer.store(&s, small, &[]);
    assert_eq!("container", res.json()["location"]);
    assert_eq!(3, names(&c).len());

    // fragments at the threshold stay standalone
    let big = vec![1; 8192];
    let res = peer.store(&s, &big, &[]);
    assert_eq!("fragment", res.json()["location"]);
    assert!(s.path(&content_address(&big)).exists());

    let res = peer.retrieve(&s, &key, &[("withMeta", "false")]);
    assert_eq!(small.to_vec(), res.body);
}

#[test]
fn container_uploads_merge() {
    let s = TestSrv::new();
    let peer = TestPeer::new();
    let (a, b, c) =
        (b"aaa".as_slice(), b"bbb".as_slice(), b"ccc".as_slice());
    let (ka, kb, kc) =
        (content_address(a), content_address(b), content_address(c));

    let one = gzip(&tar_of(&[(ka.as_str(), a), (kb.as_str(), b)]));
    assert_eq!(200, peer.store_as(&s, "one.tar.gz", &one, &[]).status);

    let two = gzip(&tar_of(&[(kb.as_str(), b), (kc.as_str(), c)]));
    let res = peer.store_as(&s, "two.tar.gz", &two, &[]);
    assert_eq!(200, res.status, "{}", res.text());

    let container = s.container(&peer, Compression::Gzip);
    assert_eq!(
        vec![ka, kb, kc.clone()],
        container.verify_digests(".meta").unwrap()
    );

    // nothing but the container is left in storage
    assert_eq!(1, files_in(&s));

    assert_eq!(c.to_vec(), peer.retrieve(&s, &kc, &[]).body);
}

#[test]
fn corrupt_container_upload_is_refused() {
    let s = TestSrv::new();
    let peer = TestPeer::new();

    let lying = tar_of(&[(content_address(b"x").as_str(), &b"not x"[..])]);
    let res = peer.store_as(&s, "bad.tar", &lying, &[]);
    assert_eq!(409, res.status);
    assert!(res.text().contains("NonCanonicalKey"), "{}", res.text());

    let whole = tar_of(&[(content_address(b"x").as_str(), &b"x"[..])]);
    let res = peer.store_as(&s, "cut.tar", &whole[..1024], &[]);
    assert_eq!(409, res.status);

    assert!(!s.container(&peer, Compression::Plain).exists());
    assert_eq!(0, files_in(&s));
}

#[test]
fn concurrent_container_edits_keep_every_member() {
    let s = TestSrv::new();
    let peer = TestPeer::new();

    let anchor = b"stays put".to_vec();
    let doomed: Vec<Vec<u8>> =
        (0..6).map(|i| format!("doomed {i}").into_bytes()).collect();
    let fresh: Vec<Vec<u8>> =
        (0..6).map(|i| format!("fresh {i}").into_bytes()).collect();

    let anchor_key = content_address(&anchor);
    let doomed_keys: Vec<String> =
        doomed.iter().map(|c| content_address(c)).collect();
    let mut members = vec![(anchor_key.as_str(), anchor.as_slice())];
    members.extend(
        doomed_keys
            .iter()
            .map(String::as_str)
            .zip(doomed.iter().map(Vec::as_slice)),
    );
    let res = peer.store_as(&s, "bundle.tar", &tar_of(&members), &[]);
    assert_eq!(200, res.status, "{}", res.text());

    let (srv, p) = (&s, &peer);
    std::thread::scope(|scope| {
        for content in &fresh {
            scope.spawn(move || {
                let res = p.store(srv, content, &[]);
                assert_eq!(200, res.status, "{}", res.text());
                assert_eq!("container", res.json()["location"]);
            });
        }
        for key in &doomed_keys {
            scope.spawn(move || {
                let res = p.delete(srv, key, "m");
                assert_eq!(200, res.status, "{}", res.text());
                assert_eq!(true, res.json()["removed"]);
            });
        }
    });

    let mut expected: Vec<String> = fresh
        .iter()
        .map(|c| content_address(c))
        .chain([anchor_key])
        .collect();
    expected.sort();

    // every edit landed, and the container still ends properly
    let mut present = s
        .container(&peer, Compression::Plain)
        .verify_digests(".meta")
        .unwrap();
    present.sort();
    assert_eq!(expected, present);
    assert_eq!(1, files_in(&s));
}
