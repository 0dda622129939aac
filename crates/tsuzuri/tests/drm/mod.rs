use std::sync::Arc;

use tsuzuri::{
    drm::{
        playready::PlayReadyResolver, widevine::WidevineResolver, DrmResolver, LicensePhase,
        TransportError,
    },
    protection::{DrmSystem, KeyId, ProtectionInfo, SystemPssh},
    DrmConfig, TsuzuriError,
};
use tsuzuri_playready::test_support::{DeviceFiles, FakeLicenseServer as PlayReadyServer};
use tsuzuri_widevine::{
    protocol::license::key_container::KeyType,
    test_support::{test_device, FakeLicenseServer as WidevineServer},
    WidevineInitData,
};

const KID: [u8; 16] = [0x3c; 16];
const KEY: [u8; 16] = [0x9d; 16];

fn key_id_info(kid: [u8; 16]) -> ProtectionInfo {
    ProtectionInfo {
        key_id: Some(KeyId(kid)),
        pssh: Vec::new(),
    }
}

#[test]
fn test_widevine_license_exchange() -> anyhow::Result<()> {
    let device = test_device();
    let server = WidevineServer::new(device.public_key())
        .with_key(KeyType::Signing, [0x01; 16], [0x02; 16])
        .with_key(KeyType::Content, [0x77; 16], [0x55; 16])
        .with_key(KeyType::Content, KID, KEY);
    let transport = move |request: &[u8]| -> Result<Vec<u8>, TransportError> {
        server.respond(request).map_err(Into::into)
    };

    let resolver = WidevineResolver::new(device, Arc::new(transport));
    let info = ProtectionInfo {
        key_id: None,
        pssh: vec![SystemPssh {
            system: DrmSystem::Widevine,
            data: WidevineInitData::from_key_ids(&[KID]).to_vec(),
        }],
    };

    // The only key id named by the pssh picks the key
    let key = resolver.resolve_key(&info)?;
    assert_eq!(key.key_id, KeyId(KID));
    assert_eq!(key.key.as_bytes(), &KEY);
    Ok(())
}

#[test]
fn test_widevine_zero_key_is_not_found() -> anyhow::Result<()> {
    let device = test_device();
    let server = WidevineServer::new(device.public_key()).with_key(KeyType::Content, KID, [0; 16]);
    let transport = move |request: &[u8]| -> Result<Vec<u8>, TransportError> {
        server.respond(request).map_err(Into::into)
    };

    let resolver = WidevineResolver::new(device, Arc::new(transport));
    match resolver.resolve_key(&key_id_info(KID)) {
        Err(TsuzuriError::License { phase, source }) => {
            assert_eq!(phase, LicensePhase::ExtractKey);
            assert!(matches!(*source, TsuzuriError::KeyNotFound(kid) if kid == KeyId(KID)));
        }
        other => panic!("unexpected result: {other:?}"),
    }
    Ok(())
}

#[test]
fn test_widevine_transport_failure() {
    let transport =
        |_: &[u8]| -> Result<Vec<u8>, TransportError> { Err("license server unreachable".into()) };
    let resolver = WidevineResolver::new(test_device(), Arc::new(transport));

    assert!(matches!(
        resolver.resolve_key(&key_id_info(KID)),
        Err(TsuzuriError::License {
            phase: LicensePhase::Send,
            ..
        })
    ));
}

#[test]
fn test_playready_license_exchange() -> anyhow::Result<()> {
    let files = DeviceFiles::generate();
    let server = PlayReadyServer::new().with_key(KID, KEY);
    let server_key = server.public_key();
    let transport = move |request: &[u8]| -> Result<Vec<u8>, TransportError> {
        server.respond(request).map_err(Into::into)
    };

    let resolver =
        PlayReadyResolver::new(files.device()?, Arc::new(transport)).with_server_key(server_key);
    let key = resolver.resolve_key(&key_id_info(KID))?;

    assert_eq!(key.key_id, KeyId(KID));
    assert_eq!(key.key.as_bytes(), &KEY);
    Ok(())
}

#[test]
fn test_playready_key_id_mismatch() -> anyhow::Result<()> {
    let files = DeviceFiles::generate();
    let server = PlayReadyServer::new().with_key([0x44; 16], KEY);
    let server_key = server.public_key();
    let transport = move |request: &[u8]| -> Result<Vec<u8>, TransportError> {
        server.respond(request).map_err(Into::into)
    };

    let resolver =
        PlayReadyResolver::new(files.device()?, Arc::new(transport)).with_server_key(server_key);
    match resolver.resolve_key(&key_id_info(KID)) {
        Err(TsuzuriError::License { phase, source }) => {
            assert_eq!(phase, LicensePhase::ExtractKey);
            assert!(matches!(
                *source,
                TsuzuriError::KeyIdMismatch { expected, actual }
                    if expected == KeyId(KID) && actual == KeyId([0x44; 16])
            ));
        }
        other => panic!("unexpected result: {other:?}"),
    }
    Ok(())
}

#[test]
fn test_playready_fault() -> anyhow::Result<()> {
    let files = DeviceFiles::generate();
    let transport = |_: &[u8]| -> Result<Vec<u8>, TransportError> {
        Ok(PlayReadyServer::fault_response("Access denied"))
    };

    let resolver = PlayReadyResolver::new(files.device()?, Arc::new(transport));
    assert!(matches!(
        resolver.resolve_key(&key_id_info(KID)),
        Err(TsuzuriError::License {
            phase: LicensePhase::ParseResponse,
            ..
        })
    ));
    Ok(())
}

#[test]
fn test_resolver_from_config() -> anyhow::Result<()> {
    let transport: Arc<dyn tsuzuri::drm::LicenseTransport> =
        Arc::new(|_: &[u8]| -> Result<Vec<u8>, TransportError> { Err("unused".into()) });

    // Nothing configured
    assert!(matches!(
        DrmResolver::from_config(&DrmConfig::default(), transport.clone()),
        Err(TsuzuriError::MissingCredentials(_))
    ));

    // PlayReady credentials on disk
    let dir = tempfile::tempdir()?;
    let files = DeviceFiles::generate();
    let chain = dir.path().join("bgroupcert.dat");
    let signing_key = dir.path().join("zgpriv.dat");
    std::fs::write(&chain, &files.chain)?;
    std::fs::write(&signing_key, files.signing_key)?;

    let config = DrmConfig {
        playready_certificate_chain: Some(chain),
        playready_signing_key: Some(signing_key),
        ..Default::default()
    };
    let resolver = DrmResolver::from_config(&config, transport.clone())?;
    assert_eq!(resolver.system_name(), "PlayReady");

    // A manual key takes precedence
    let config = DrmConfig {
        key: Some(format!("{}:{}", hex::encode(KID), hex::encode(KEY))),
        ..config
    };
    let resolver = DrmResolver::from_config(&config, transport)?;
    assert_eq!(resolver.system_name(), "manual key");
    assert_eq!(resolver.resolve_key(&key_id_info(KID))?.key.as_bytes(), &KEY);
    Ok(())
}
