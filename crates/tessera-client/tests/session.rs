//! End-to-end session bootstrap against a synthetic build: version
//! discovery, configs, local group-index merge, encoding, root and
//! install, then extraction by every kind of identifier.

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tessera_cdn::Region;
use tessera_client::{Session, SessionOptions};
use tessera_tact::archive::IndexWriter;
use tessera_tact::group_index::build_group_index;
use tessera_tact::ioutils::write_u40be;
use tessera_tact::jenkins3::path_hash;
use tessera_tact::root::LocaleFlags;

const EN_US: u32 = 0x2;

fn blte_wrap(payload: &[u8]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(payload.len() + 9);
    blob.extend_from_slice(b"BLTE");
    blob.extend_from_slice(&0u32.to_be_bytes());
    blob.push(b'N');
    blob.extend_from_slice(payload);
    blob
}

fn digest(data: &[u8]) -> [u8; 16] {
    md5::compute(data).0
}

/// One-page encoding table for the given (ckey, ekey, decoded size)
/// triples.
fn build_encoding(mut entries: Vec<([u8; 16], [u8; 16], u64)>) -> Vec<u8> {
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut page = vec![0u8; 1024];
    let mut off = 0;
    for (ckey, ekey, size) in &entries {
        page[off] = 1;
        page[off + 1..off + 6].copy_from_slice(&write_u40be(*size));
        page[off + 6..off + 22].copy_from_slice(ckey);
        page[off + 22..off + 38].copy_from_slice(ekey);
        off += 38;
    }

    let mut data = Vec::new();
    data.extend_from_slice(b"EN");
    data.push(1);
    data.push(16);
    data.push(16);
    data.extend_from_slice(&1u16.to_be_bytes());
    data.extend_from_slice(&1u16.to_be_bytes());
    data.extend_from_slice(&1u32.to_be_bytes()); // one ckey page
    data.extend_from_slice(&0u32.to_be_bytes()); // no espec pages
    data.push(0);
    data.extend_from_slice(&0u32.to_be_bytes()); // empty espec table
    data.extend_from_slice(&entries[0].0);
    data.extend_from_slice(&digest(&page));
    data.extend_from_slice(&page);
    data
}

/// Version-1 root blob with one page of named records.
fn build_root(locale: u32, records: &[(u32, [u8; 16], u64)]) -> Vec<u8> {
    let n = records.len() as u32;
    let mut data = Vec::new();
    data.extend_from_slice(b"TSFM");
    data.extend_from_slice(&24u32.to_le_bytes());
    data.extend_from_slice(&1u32.to_le_bytes()); // version
    data.extend_from_slice(&n.to_le_bytes()); // total
    data.extend_from_slice(&n.to_le_bytes()); // named
    data.extend_from_slice(&0u32.to_le_bytes()); // padding

    data.extend_from_slice(&n.to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes()); // content flags
    data.extend_from_slice(&locale.to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes());

    let mut prev = None;
    for (fdid, _, _) in records {
        let delta = match prev {
            None => *fdid,
            Some(p) => fdid - p - 1,
        };
        prev = Some(*fdid);
        data.extend_from_slice(&delta.to_le_bytes());
    }
    for (_, ckey, _) in records {
        data.extend_from_slice(ckey);
    }
    for (_, _, hash) in records {
        data.extend_from_slice(&hash.to_le_bytes());
    }
    data
}

/// Install manifest with untagged entries.
fn build_install(entries: &[(&str, [u8; 16], u32)]) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(b"IN");
    data.push(1);
    data.push(16);
    data.extend_from_slice(&0u16.to_be_bytes());
    data.extend_from_slice(&(entries.len() as u32).to_be_bytes());
    for (path, ckey, size) in entries {
        data.extend_from_slice(path.as_bytes());
        data.push(0);
        data.extend_from_slice(ckey);
        data.extend_from_slice(&size.to_be_bytes());
    }
    data
}

fn cdn_path(kind: &str, hex: &str, suffix: &str) -> String {
    format!("/tpr/test/{kind}/{}/{}/{hex}{suffix}", &hex[..2], &hex[2..4])
}

async fn serve(server: &MockServer, url_path: String, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(url_path))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn bootstrap_and_extract() {
    let server = MockServer::start().await;

    // The file under test, stored inside an archive.
    let payload = b"the quick brown fox jumps over the lazy dog".to_vec();
    let file_blte = blte_wrap(&payload);
    let file_ckey = digest(&payload);
    let file_ekey = digest(&file_blte);
    let name_hash = path_hash("test/file.txt");

    let archive_offset = 64u64;
    let mut archive = vec![0u8; archive_offset as usize];
    archive.extend_from_slice(&file_blte);
    let archive_hash = hex::encode(digest(&archive));

    let mut w = IndexWriter::new(4, 16, 4, 4);
    w.push(&file_ekey, file_blte.len() as u64, &(archive_offset as u32).to_be_bytes())
        .unwrap();
    let (archive_index, _) = w.finish();

    // Root and install, standalone blobs listed in the file index.
    let root_bytes = build_root(EN_US, &[(1234, file_ckey, name_hash)]);
    let root_blte = blte_wrap(&root_bytes);
    let root_ckey = digest(&root_bytes);
    let root_ekey = digest(&root_blte);

    let install_bytes = build_install(&[("tessera.exe", file_ckey, payload.len() as u32)]);
    let install_blte = blte_wrap(&install_bytes);
    let install_ckey = digest(&install_bytes);
    let install_ekey = digest(&install_blte);

    let mut file_entries = vec![
        (root_ekey, root_blte.len() as u64),
        (install_ekey, install_blte.len() as u64),
    ];
    file_entries.sort();
    let mut w = IndexWriter::new(4, 16, 4, 0);
    for (key, size) in &file_entries {
        w.push(key, *size, &[]).unwrap();
    }
    let (file_index, file_index_hash) = w.finish();

    // Encoding table mapping all three content keys.
    let encoding_bytes = build_encoding(vec![
        (file_ckey, file_ekey, payload.len() as u64),
        (root_ckey, root_ekey, root_bytes.len() as u64),
        (install_ckey, install_ekey, install_bytes.len() as u64),
    ]);
    let encoding_blte = blte_wrap(&encoding_bytes);
    let encoding_ckey = digest(&encoding_bytes);
    let encoding_ekey = digest(&encoding_blte);

    // Pre-compute the group index name so the CDN configuration can
    // promise it; the session must rebuild and verify it.
    let scratch = tempfile::tempdir().unwrap();
    let archive_index_path = scratch.path().join("a.index");
    std::fs::write(&archive_index_path, &archive_index).unwrap();
    let (_, group_name) =
        build_group_index(&[archive_index_path], None, scratch.path()).unwrap();

    let build_config_text = format!(
        "# build\n\
         root = {}\n\
         install = {}\n\
         encoding = {} {}\n\
         encoding-size = {} {}\n",
        hex::encode(root_ckey),
        hex::encode(install_ckey),
        hex::encode(encoding_ckey),
        hex::encode(encoding_ekey),
        encoding_bytes.len(),
        encoding_blte.len(),
    );
    let build_hash = hex::encode(digest(build_config_text.as_bytes()));

    let cdn_config_text = format!(
        "archives = {archive_hash}\n\
         archive-group = {group_name}\n\
         file-index = {file_index_hash}\n",
    );
    let cdn_hash = hex::encode(digest(cdn_config_text.as_bytes()));

    let authority = server.uri().strip_prefix("http://").unwrap().to_string();
    let versions_text = format!(
        "Region!STRING:0|BuildConfig!HEX:16|CDNConfig!HEX:16\n\
         ## seqn = 1\n\
         us|{build_hash}|{cdn_hash}\n"
    );
    let cdns_text = format!(
        "Name!STRING:0|Path!STRING:0|Hosts!STRING:0|Servers!STRING:0|ConfigPath!STRING:0\n\
         us|tpr/test|{authority}|http://unused.example|tpr/configs\n"
    );

    // Patch service.
    serve(&server, "/test/versions".into(), versions_text.into_bytes()).await;
    serve(&server, "/test/cdns".into(), cdns_text.into_bytes()).await;

    // Mirrors answer HEAD with 405, like several real ones.
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;

    // Configs, indices and blobs. The promised group index is absent
    // remotely, forcing the local merge (checked against its name).
    serve(&server, cdn_path("config", &build_hash, ""), build_config_text.into_bytes()).await;
    serve(&server, cdn_path("config", &cdn_hash, ""), cdn_config_text.into_bytes()).await;
    serve(&server, cdn_path("data", &archive_hash, ".index"), archive_index).await;
    serve(&server, cdn_path("data", &file_index_hash, ".index"), file_index).await;
    serve(&server, cdn_path("data", &hex::encode(encoding_ekey), ""), encoding_blte).await;
    serve(&server, cdn_path("data", &hex::encode(root_ekey), ""), root_blte).await;
    serve(&server, cdn_path("data", &hex::encode(install_ekey), ""), install_blte).await;

    // The archived blob is only reachable by range request.
    Mock::given(method("GET"))
        .and(path(cdn_path("data", &archive_hash, "")))
        .and(wiremock::matchers::header(
            "range",
            format!(
                "bytes={}-{}",
                archive_offset,
                archive_offset + file_blte.len() as u64 - 1
            )
            .as_str(),
        ))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(file_blte.clone()))
        .mount(&server)
        .await;

    let cache = tempfile::tempdir().unwrap();
    let mut options = SessionOptions::new(
        "test",
        Region::US,
        LocaleFlags::from_name("enUS").unwrap(),
    );
    options.cache_dir = cache.path().to_path_buf();
    options.patch_base = Some(server.uri());

    let session = Session::open(options).await.unwrap();

    // Every identifier kind resolves to the same bytes.
    assert_eq!(session.file_by_fdid(1234).await.unwrap().unwrap(), payload);
    assert_eq!(
        session.file_by_name("TEST\\FILE.TXT").await.unwrap().unwrap(),
        payload
    );
    assert_eq!(
        session
            .file_by_ckey_hex(&hex::encode(file_ckey))
            .await
            .unwrap()
            .unwrap(),
        payload
    );
    assert_eq!(
        session
            .file_by_ekey(&hex::encode(file_ekey))
            .await
            .unwrap()
            .unwrap(),
        payload
    );

    // Misses are clean.
    assert!(session.file_by_fdid(999).await.unwrap().is_none());
    assert!(session.file_by_name("no/such/file").await.unwrap().is_none());

    // Install manifest is consultable, and the locally merged group
    // index landed in the cache under its own name.
    assert!(session.install().find("tessera.exe").is_some());
    assert!(cache
        .path()
        .join("test")
        .join(format!("{group_name}.index"))
        .is_file());
}
