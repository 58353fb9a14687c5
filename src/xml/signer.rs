//! # XML Signer
//!
//! Produces an enveloped XML-DSig signature over a UBL document using the
//! resolved signing key. The signature lands inside the document's
//! `ext:ExtensionContent` placeholder when one is present, otherwise directly
//! before the closing root tag.
//!
//! Digest and signature serialization are byte-exact mirrors of each other:
//! the reference digest covers the document with the signature block absent,
//! and the signature covers the `SignedInfo` element exactly as emitted.
//! [`verify`] applies the same rules, which keeps signing round-trippable.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha2::{Digest, Sha256, Sha384, Sha512};
use thiserror::Error;

use crate::keys::{KeyAlgorithm, SigningKey};

const SIGNATURE_ID: &str = "DOCUMENT-SIGNATURE";
const PLACEHOLDER_OPEN: &str = "<ext:ExtensionContent>";
const PLACEHOLDER_SELF_CLOSED: &str = "<ext:ExtensionContent/>";

/// Errors raised while signing or verifying a document
#[derive(Error, Debug)]
pub enum SignError {
    #[error("Document is not valid UTF-8: {0}")]
    InvalidDocument(String),

    #[error("Document has no closing root tag to anchor the signature")]
    NoRootElement,

    #[error("Signature algorithm {0} is not supported for XML signatures")]
    UnsupportedAlgorithm(KeyAlgorithm),

    #[error("RSA signing failed: {0}")]
    Signing(String),

    #[error("Signature block not found or malformed")]
    MissingSignature,
}

/// Signs documents with one resolved key
pub struct XmlSigner {
    key: SigningKey,
}

impl XmlSigner {
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    pub fn key(&self) -> &SigningKey {
        &self.key
    }

    /// Produce the signed document
    pub fn sign_document(&self, xml: &[u8]) -> Result<Vec<u8>, SignError> {
        let document =
            std::str::from_utf8(xml).map_err(|e| SignError::InvalidDocument(e.to_string()))?;
        // The reference digest covers the document exactly as it will read
        // with the signature block absent, so the self-closing placeholder
        // form is expanded before digesting.
        let document = document.replacen(
            PLACEHOLDER_SELF_CLOSED,
            "<ext:ExtensionContent></ext:ExtensionContent>",
            1,
        );

        let (digest_uri, signature_uri) = algorithm_uris(self.key.algorithm)?;

        let digest_value = STANDARD.encode(hash(self.key.algorithm, document.as_bytes())?);

        let signed_info = format!(
            concat!(
                "<ds:SignedInfo>",
                "<ds:CanonicalizationMethod Algorithm=\"http://www.w3.org/2001/10/xml-exc-c14n#\"/>",
                "<ds:SignatureMethod Algorithm=\"{signature_uri}\"/>",
                "<ds:Reference URI=\"\">",
                "<ds:Transforms>",
                "<ds:Transform Algorithm=\"http://www.w3.org/2000/09/xmldsig#enveloped-signature\"/>",
                "</ds:Transforms>",
                "<ds:DigestMethod Algorithm=\"{digest_uri}\"/>",
                "<ds:DigestValue>{digest_value}</ds:DigestValue>",
                "</ds:Reference>",
                "</ds:SignedInfo>"
            ),
            signature_uri = signature_uri,
            digest_uri = digest_uri,
            digest_value = digest_value,
        );

        let signature_value = self.rsa_sign(signed_info.as_bytes())?;

        let key_info = match self.key.certificate_base64() {
            Some(certificate) => format!(
                "<ds:KeyInfo><ds:X509Data><ds:X509Certificate>{certificate}</ds:X509Certificate></ds:X509Data></ds:KeyInfo>"
            ),
            None => String::new(),
        };

        let signature = format!(
            concat!(
                "<ds:Signature xmlns:ds=\"http://www.w3.org/2000/09/xmldsig#\" Id=\"{id}\">",
                "{signed_info}",
                "<ds:SignatureValue>{signature_value}</ds:SignatureValue>",
                "{key_info}",
                "</ds:Signature>"
            ),
            id = SIGNATURE_ID,
            signed_info = signed_info,
            signature_value = signature_value,
            key_info = key_info,
        );

        insert_signature(&document, &signature).map(String::into_bytes)
    }

    fn rsa_sign(&self, data: &[u8]) -> Result<String, SignError> {
        let digest = hash(self.key.algorithm, data)?;
        let padding = match self.key.algorithm {
            KeyAlgorithm::RS256 => Pkcs1v15Sign::new::<Sha256>(),
            KeyAlgorithm::RS384 => Pkcs1v15Sign::new::<Sha384>(),
            KeyAlgorithm::RS512 => Pkcs1v15Sign::new::<Sha512>(),
            other => return Err(SignError::UnsupportedAlgorithm(other)),
        };
        let signature = self
            .key
            .private_key
            .sign(padding, &digest)
            .map_err(|e| SignError::Signing(e.to_string()))?;
        Ok(STANDARD.encode(signature))
    }
}

fn algorithm_uris(algorithm: KeyAlgorithm) -> Result<(&'static str, &'static str), SignError> {
    match algorithm {
        KeyAlgorithm::RS256 => Ok((
            "http://www.w3.org/2001/04/xmlenc#sha256",
            "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256",
        )),
        KeyAlgorithm::RS384 => Ok((
            "http://www.w3.org/2001/04/xmldsig-more#sha384",
            "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384",
        )),
        KeyAlgorithm::RS512 => Ok((
            "http://www.w3.org/2001/04/xmlenc#sha512",
            "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512",
        )),
        other => Err(SignError::UnsupportedAlgorithm(other)),
    }
}

fn hash(algorithm: KeyAlgorithm, data: &[u8]) -> Result<Vec<u8>, SignError> {
    match algorithm {
        KeyAlgorithm::RS256 => Ok(Sha256::digest(data).to_vec()),
        KeyAlgorithm::RS384 => Ok(Sha384::digest(data).to_vec()),
        KeyAlgorithm::RS512 => Ok(Sha512::digest(data).to_vec()),
        other => Err(SignError::UnsupportedAlgorithm(other)),
    }
}

fn insert_signature(document: &str, signature: &str) -> Result<String, SignError> {
    let insert_at = match document.find(PLACEHOLDER_OPEN) {
        Some(position) => position + PLACEHOLDER_OPEN.len(),
        None => document.rfind("</").ok_or(SignError::NoRootElement)?,
    };

    let mut result = String::with_capacity(document.len() + signature.len());
    result.push_str(&document[..insert_at]);
    result.push_str(signature);
    result.push_str(&document[insert_at..]);
    Ok(result)
}

/// Verify a document produced by [`XmlSigner::sign_document`]: the reference
/// digest must match the document with the signature block removed, and the
/// signature value must verify over the embedded `SignedInfo`.
pub fn verify(signed_xml: &[u8], public_key: &RsaPublicKey) -> Result<bool, SignError> {
    let document =
        std::str::from_utf8(signed_xml).map_err(|e| SignError::InvalidDocument(e.to_string()))?;

    let signature_start = document
        .find("<ds:Signature ")
        .ok_or(SignError::MissingSignature)?;
    let signature_end = document
        .find("</ds:Signature>")
        .ok_or(SignError::MissingSignature)?
        + "</ds:Signature>".len();

    let mut original = String::with_capacity(document.len());
    original.push_str(&document[..signature_start]);
    original.push_str(&document[signature_end..]);

    let signed_info = slice_between(document, "<ds:SignedInfo>", "</ds:SignedInfo>")
        .ok_or(SignError::MissingSignature)?;
    let digest_value = slice_between(document, "<ds:DigestValue>", "</ds:DigestValue>")
        .ok_or(SignError::MissingSignature)?;
    let signature_value = slice_between(document, "<ds:SignatureValue>", "</ds:SignatureValue>")
        .ok_or(SignError::MissingSignature)?;
    let algorithm = signature_algorithm(document)?;

    let expected_digest = STANDARD.encode(hash(algorithm, original.as_bytes())?);
    if expected_digest != digest_value {
        return Ok(false);
    }

    let signature = STANDARD
        .decode(signature_value)
        .map_err(|_| SignError::MissingSignature)?;
    let signed_info_full = format!("<ds:SignedInfo>{signed_info}</ds:SignedInfo>");
    let digest = hash(algorithm, signed_info_full.as_bytes())?;
    let padding = match algorithm {
        KeyAlgorithm::RS256 => Pkcs1v15Sign::new::<Sha256>(),
        KeyAlgorithm::RS384 => Pkcs1v15Sign::new::<Sha384>(),
        KeyAlgorithm::RS512 => Pkcs1v15Sign::new::<Sha512>(),
        other => return Err(SignError::UnsupportedAlgorithm(other)),
    };

    Ok(public_key.verify(padding, &digest, &signature).is_ok())
}

fn signature_algorithm(document: &str) -> Result<KeyAlgorithm, SignError> {
    let method = slice_between(document, "<ds:SignatureMethod Algorithm=\"", "\"/>")
        .ok_or(SignError::MissingSignature)?;
    match method {
        "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256" => Ok(KeyAlgorithm::RS256),
        "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384" => Ok(KeyAlgorithm::RS384),
        "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512" => Ok(KeyAlgorithm::RS512),
        _ => Err(SignError::MissingSignature),
    }
}

fn slice_between<'a>(haystack: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let from = haystack.find(start)? + start.len();
    let to = from + haystack[from..].find(end)?;
    Some(&haystack[from..to])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{key_id, KeyStatus, KeyUse};
    use rsa::RsaPrivateKey;
    use uuid::Uuid;

    fn test_key(algorithm: KeyAlgorithm) -> SigningKey {
        let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        let public_key = RsaPublicKey::from(&private_key);
        SigningKey {
            kid: key_id(&public_key).unwrap(),
            use_: KeyUse::Sig,
            algorithm,
            status: KeyStatus::Active,
            provider_id: Uuid::new_v4(),
            provider_priority: 0,
            private_key,
            public_key,
            certificate_pem: None,
        }
    }

    const DOCUMENT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Invoice xmlns:ext="urn:oasis:names:specification:ubl:schema:xsd:CommonExtensionComponents-2">
  <ext:UBLExtensions>
    <ext:UBLExtension>
      <ext:ExtensionContent></ext:ExtensionContent>
    </ext:UBLExtension>
  </ext:UBLExtensions>
  <cbc:ID>F001-1</cbc:ID>
</Invoice>"#;

    #[test]
    fn test_sign_into_extension_placeholder() {
        let key = test_key(KeyAlgorithm::RS256);
        let signer = XmlSigner::new(key.clone());

        let signed = signer.sign_document(DOCUMENT.as_bytes()).unwrap();
        let signed_str = std::str::from_utf8(&signed).unwrap();

        assert!(signed_str.contains("<ext:ExtensionContent><ds:Signature"));
        assert!(signed_str.contains("rsa-sha256"));
        assert!(verify(&signed, &key.public_key).unwrap());
    }

    #[test]
    fn test_sign_without_placeholder_appends_before_root_close() {
        let key = test_key(KeyAlgorithm::RS256);
        let signer = XmlSigner::new(key.clone());
        let xml = "<Invoice><cbc:ID>F001-2</cbc:ID></Invoice>";

        let signed = signer.sign_document(xml.as_bytes()).unwrap();
        let signed_str = std::str::from_utf8(&signed).unwrap();

        assert!(signed_str.ends_with("</ds:Signature></Invoice>"));
        assert!(verify(&signed, &key.public_key).unwrap());
    }

    #[test]
    fn test_tampered_document_fails_verification() {
        let key = test_key(KeyAlgorithm::RS256);
        let signer = XmlSigner::new(key.clone());

        let signed = signer.sign_document(DOCUMENT.as_bytes()).unwrap();
        let tampered = String::from_utf8(signed).unwrap().replace("F001-1", "F001-9");

        assert!(!verify(tampered.as_bytes(), &key.public_key).unwrap());
    }

    #[test]
    fn test_wrong_key_fails_verification() {
        let key = test_key(KeyAlgorithm::RS256);
        let other = test_key(KeyAlgorithm::RS256);
        let signer = XmlSigner::new(key);

        let signed = signer.sign_document(DOCUMENT.as_bytes()).unwrap();
        assert!(!verify(&signed, &other.public_key).unwrap());
    }

    #[test]
    fn test_certificate_embedded_in_key_info() {
        let mut key = test_key(KeyAlgorithm::RS256);
        key.certificate_pem = Some(
            "-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----".to_string(),
        );
        let signer = XmlSigner::new(key);

        let signed = signer.sign_document(DOCUMENT.as_bytes()).unwrap();
        let signed_str = std::str::from_utf8(&signed).unwrap();
        assert!(signed_str.contains("<ds:X509Certificate>AAAA</ds:X509Certificate>"));
    }

    #[test]
    fn test_unsupported_algorithm_rejected() {
        let key = test_key(KeyAlgorithm::ES256);
        let signer = XmlSigner::new(key);
        let err = signer.sign_document(DOCUMENT.as_bytes()).unwrap_err();
        assert!(matches!(err, SignError::UnsupportedAlgorithm(_)));
    }

    #[test]
    fn test_rs512_round_trip() {
        let key = test_key(KeyAlgorithm::RS512);
        let signer = XmlSigner::new(key.clone());
        let signed = signer.sign_document(DOCUMENT.as_bytes()).unwrap();
        assert!(verify(&signed, &key.public_key).unwrap());
    }
}
