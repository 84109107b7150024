//! TLS upgrade in two stages: building the client configuration ("setup") and running
//! the handshake over an already-connected socket ("enable").
use std::{fmt, net::TcpStream, sync::Arc};

use rustls::{ClientConfig, ClientConnection, RootCertStore};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName, pem::PemObject};

use crate::config::TlsContext;

use super::{Endpoint, TlsStage, TransportError};

fn setup_failed(reason: impl fmt::Display) -> TransportError {
    TransportError::Tls {
        stage: TlsStage::Setup,
        reason: reason.to_string(),
    }
}

fn enable_failed(reason: impl fmt::Display) -> TransportError {
    TransportError::Tls {
        stage: TlsStage::Enable,
        reason: reason.to_string(),
    }
}

/// Only TLS 1.2 and 1.3 are offered; the handshake fails rather than falling back.
pub(super) fn client_config(context: &TlsContext) -> Result<Arc<ClientConfig>, TransportError> {
    let roots = match &context.ca_file {
        Some(path) => {
            let mut roots = RootCertStore::empty();
            for cert in CertificateDer::pem_file_iter(path).map_err(setup_failed)? {
                roots.add(cert.map_err(setup_failed)?).map_err(setup_failed)?;
            }
            if roots.is_empty() {
                return Err(setup_failed(format!(
                    "no certificates found in {}",
                    path.display()
                )));
            }
            roots
        }
        None => RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    };

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(setup_failed)?
        .with_root_certificates(roots);

    let config = match &context.local_cert {
        Some(path) => {
            let chain = CertificateDer::pem_file_iter(path)
                .map_err(setup_failed)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(setup_failed)?;
            let key = PrivateKeyDer::from_pem_file(path).map_err(setup_failed)?;
            builder
                .with_client_auth_cert(chain, key)
                .map_err(setup_failed)?
        }
        None => builder.with_no_client_auth(),
    };

    Ok(Arc::new(config))
}

pub(super) fn server_name(
    endpoint: &Endpoint,
    context: &TlsContext,
) -> Result<ServerName<'static>, TransportError> {
    let name = context
        .peer_name
        .clone()
        .unwrap_or_else(|| endpoint.host.clone());

    ServerName::try_from(name.clone())
        .map_err(|e| setup_failed(format!("invalid peer name '{name}': {e}")))
}

pub(super) fn handshake(
    config: Arc<ClientConfig>,
    server_name: ServerName<'static>,
    tcp: &mut TcpStream,
) -> Result<ClientConnection, TransportError> {
    let mut conn = ClientConnection::new(config, server_name).map_err(enable_failed)?;

    while conn.is_handshaking() {
        conn.complete_io(tcp).map_err(enable_failed)?;
    }

    Ok(conn)
}

#[cfg(test)]
mod tests {
    use std::{
        io::{Read, Write},
        net::TcpListener,
        thread,
    };

    use tempdir::TempDir;

    use crate::{
        ErrorKind,
        config::DriverConfig,
        transport::{SystemConnector, TransportHandle},
    };

    use super::*;

    #[test]
    fn default_roots_build_a_config() {
        assert!(client_config(&TlsContext::default()).is_ok());
    }

    #[test]
    fn missing_ca_file_fails_setup() {
        let context = TlsContext {
            ca_file: Some("/nonexistent/ca.pem".into()),
            ..Default::default()
        };
        let err = client_config(&context).unwrap_err();
        assert!(matches!(
            err,
            TransportError::Tls {
                stage: TlsStage::Setup,
                ..
            }
        ));
    }

    #[test]
    fn empty_ca_file_fails_setup() {
        let dir = TempDir::new("docwire-tls").unwrap();
        let path = dir.path().join("ca.pem");
        std::fs::write(&path, "not a certificate\n").unwrap();

        let context = TlsContext {
            ca_file: Some(path),
            ..Default::default()
        };
        assert!(client_config(&context).is_err());
    }

    #[test]
    fn peer_name_overrides_host() {
        let endpoint = Endpoint::tcp("10.0.0.7", 27017);
        let context = TlsContext {
            peer_name: Some("db.internal".into()),
            ..Default::default()
        };
        let name = server_name(&endpoint, &context).unwrap();
        assert_eq!(name, ServerName::try_from("db.internal").unwrap());
    }

    #[test]
    fn handshake_with_plaintext_server_is_ssl_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut hello = [0u8; 5];
            let _ = socket.read(&mut hello);
            let _ = socket.write_all(b"HTTP/1.0 400 Bad Request\r\n\r\n");
        });

        let config = DriverConfig::new(
            &format!("mongodb://localhost:{port}/?ssl=true&connectTimeoutMS=2000"),
            None,
        )
        .unwrap();
        let endpoint = Endpoint::tcp("127.0.0.1", port);

        let err = TransportHandle::connect(&SystemConnector, &endpoint, &config)
            .err()
            .unwrap();
        server.join().unwrap();

        assert_eq!(crate::Error::from(err).kind(), ErrorKind::SslConnectionFailed);
    }
}
