//! Byte builders and mock helpers shared by the integration tests.

use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("tsuzuri=debug")
        .with_test_writer()
        .try_init();
}

pub fn make_box(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut data = ((body.len() + 8) as u32).to_be_bytes().to_vec();
    data.extend_from_slice(kind);
    data.extend_from_slice(body);
    data
}

pub fn full_box(kind: &[u8; 4], version: u8, flags: u32, body: &[u8]) -> Vec<u8> {
    let mut data = flags.to_be_bytes().to_vec();
    data[0] = version;
    data.extend_from_slice(body);
    make_box(kind, &data)
}

/// Version 0 `sidx` with `(referenced_size, subsegment_duration)` references.
pub fn make_sidx(timescale: u32, first_offset: u32, refs: &[(u32, u32)]) -> Vec<u8> {
    let mut body = 1u32.to_be_bytes().to_vec();
    body.extend_from_slice(&timescale.to_be_bytes());
    body.extend_from_slice(&0u32.to_be_bytes());
    body.extend_from_slice(&first_offset.to_be_bytes());
    body.extend_from_slice(&0u16.to_be_bytes());
    body.extend_from_slice(&(refs.len() as u16).to_be_bytes());
    for (size, duration) in refs {
        body.extend_from_slice(&size.to_be_bytes());
        body.extend_from_slice(&duration.to_be_bytes());
        body.extend_from_slice(&0x9000_0000u32.to_be_bytes());
    }
    full_box(b"sidx", 0, 0, &body)
}

/// Clear `ftyp` + `moov` with one track, an edit list and `trex` defaults.
pub fn make_init(timescale: u32) -> Vec<u8> {
    let mut mdhd = vec![0u8; 8];
    mdhd.extend_from_slice(&timescale.to_be_bytes());
    mdhd.extend_from_slice(&[0u8; 8]);
    let mdia = make_box(b"mdia", &full_box(b"mdhd", 0, 0, &mdhd));

    let mut trak = full_box(b"tkhd", 0, 3, &[0u8; 80]);
    trak.extend(make_box(b"edts", &full_box(b"elst", 0, 0, &[0u8; 16])));
    trak.extend(mdia);

    let mut trex = Vec::new();
    for value in [1u32, 1, 1000, 0, 0] {
        trex.extend_from_slice(&value.to_be_bytes());
    }

    let mut moov = full_box(b"mvhd", 0, 0, &[0u8; 96]);
    moov.extend(make_box(b"trak", &trak));
    moov.extend(make_box(b"mvex", &full_box(b"trex", 0, 0, &trex)));

    let mut init = make_box(b"ftyp", b"iso6\x00\x00\x00\x00");
    init.extend(make_box(b"moov", &moov));
    init
}

/// `moof` + `mdat` of track 1 with `(duration, size)` samples.
pub fn make_fragment(samples: &[(u32, u32)]) -> Vec<u8> {
    let tfhd = full_box(b"tfhd", 0, 0x020000, &1u32.to_be_bytes());

    let mut trun = (samples.len() as u32).to_be_bytes().to_vec();
    trun.extend_from_slice(&0u32.to_be_bytes());
    for (duration, size) in samples {
        trun.extend_from_slice(&duration.to_be_bytes());
        trun.extend_from_slice(&size.to_be_bytes());
    }
    let trun = full_box(b"trun", 0, 0x301, &trun);

    let mut traf = tfhd;
    traf.extend(trun);
    let mut fragment = make_box(b"moof", &make_box(b"traf", &traf));

    let payload: u32 = samples.iter().map(|(_, size)| size).sum();
    fragment.extend(make_box(b"mdat", &vec![0x5a; payload as usize]));
    fragment
}

pub trait MockExt {
    async fn mock_bytes(&self, mock_path: &str, body: Vec<u8>) -> &Self;

    async fn mock_range(&self, mock_path: &str, range: &str, body: Vec<u8>) -> &Self;

    async fn mock_status(&self, mock_path: &str, status: u16, body: &str) -> &Self;
}

impl MockExt for MockServer {
    async fn mock_bytes(&self, mock_path: &str, body: Vec<u8>) -> &Self {
        Mock::given(method("GET"))
            .and(path(mock_path))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(self)
            .await;
        self
    }

    async fn mock_range(&self, mock_path: &str, range: &str, body: Vec<u8>) -> &Self {
        Mock::given(method("GET"))
            .and(path(mock_path))
            .and(header("Range", range))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(body))
            .mount(self)
            .await;
        self
    }

    async fn mock_status(&self, mock_path: &str, status: u16, body: &str) -> &Self {
        Mock::given(method("GET"))
            .and(path(mock_path))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(self)
            .await;
        self
    }
}
