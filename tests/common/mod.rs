#![allow(dead_code)]

use boring::asn1::Asn1Time;
use boring::bn::BigNum;
use boring::hash::MessageDigest;
use boring::pkey::PKey;
use boring::rsa::Rsa;
use boring::x509::{X509NameBuilder, X509};
use bytes::Bytes;
use http::{header, StatusCode};
use portico::base::neterror::NetError;
use portico::config::{BridgeConfig, PemSource, ServerConfig};
use portico::server::handler::{full, streaming, text, ServerRequest};
use portico::server::{Domain, Server};
use std::net::SocketAddr;

/// A throwaway self-signed certificate for `common_name`, as PEM.
pub fn self_signed(common_name: &str) -> (String, String) {
    let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", common_name).unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
    builder.set_not_after(&Asn1Time::days_from_now(1).unwrap()).unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();
    let cert = builder.build();

    (
        String::from_utf8(cert.to_pem().unwrap()).unwrap(),
        String::from_utf8(key.private_key_to_pem_pkcs8().unwrap()).unwrap(),
    )
}

/// `domain` with a fresh self-signed certificate for its name.
pub fn with_certificate(domain: Domain) -> Domain {
    let (cert, key) = self_signed(domain.name());
    domain.with_pem(PemSource::Inline(cert), PemSource::Inline(key))
}

/// A domain whose handler exercises the common server paths:
///
/// - `/login` sets a `session` cookie
/// - `/whoami` echoes the `Cookie` header
/// - `/redirect` answers 302 to `/whoami`
/// - `/echo` echoes the request body
/// - `/fail` makes the handler fail
/// - `/stream` streams 100 numbered lines
/// - anything else answers `<domain> <version>`
pub fn site(name: &str) -> Domain {
    let label = name.to_owned();
    Domain::new(name).with_handler(move |req: ServerRequest| {
        let label = label.clone();
        async move {
            let response = match req.uri().path() {
                "/login" => {
                    let mut response = text(StatusCode::OK, "welcome");
                    response
                        .headers_mut()
                        .insert(header::SET_COOKIE, "session=s3cr3t; Path=/".parse().unwrap());
                    response
                }
                "/whoami" => {
                    let cookie = req
                        .headers()
                        .get(header::COOKIE)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("anonymous")
                        .to_owned();
                    text(StatusCode::OK, cookie)
                }
                "/redirect" => {
                    let mut response = full(StatusCode::FOUND, Bytes::new());
                    response.headers_mut().insert(header::LOCATION, "/whoami".parse().unwrap());
                    response
                }
                "/echo" => full(StatusCode::OK, req.into_body()),
                "/fail" => return Err(NetError::HandlerFailed("deliberate failure".into())),
                "/stream" => {
                    let lines = (0..100).map(|i| Ok(Bytes::from(format!("line {i}\n"))));
                    streaming(StatusCode::OK, futures::stream::iter(lines), BridgeConfig::default())
                }
                _ => text(StatusCode::OK, format!("{label} {:?}", req.version())),
            };
            Ok(response)
        }
    })
}

/// The expected body of `/stream`.
pub fn stream_body() -> String {
    (0..100).map(|i| format!("line {i}\n")).collect()
}

/// Start a server and return it with its bound address.
pub async fn start(config: ServerConfig, default: Domain, domains: Vec<Domain>) -> (Server, SocketAddr) {
    let mut server = Server::new(config, default, domains).unwrap();
    let addr = server.accept().await.unwrap();
    (server, addr)
}
