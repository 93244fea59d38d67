//! Server identification string parsing.
//!
//! On accept, Rserve sends a fixed 32-byte greeting: bytes 0–3 the
//! protocol-family magic `"Rsrv"`, bytes 4–7 the server protocol version,
//! bytes 8–11 the transport id `"QAP1"`, and bytes 12–31 a sequence of
//! 4-byte capability tokens (`"ARuc"` challenge auth, `"ARpt"` plaintext
//! auth, `'K'` + two salt bytes, or padding).

use crate::error::{Result, RserveError};

/// Length of the identification string.
pub const ID_LENGTH: usize = 32;

/// Protocol identity of this client: family magic, highest supported
/// version, transport id.
pub const CLIENT_ID: &[u8; 12] = b"Rsrv0103QAP1";

/// Capabilities announced by the server greeting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerIdent {
    /// Login is required before other commands.
    pub auth_required: bool,
    /// Challenge (crypt) authentication is accepted.
    pub crypt_auth: bool,
    /// Plaintext authentication is accepted.
    pub plain_auth: bool,
    /// Two-byte salt for the crypt challenge.
    pub salt: Option<[u8; 2]>,
}

/// Validate a complete identification string and extract capabilities.
///
/// Fails with `InvalidId` when the family magic is wrong, and with
/// `ProtocolNotSupported` when the transport id differs or the server
/// version is lexically newer than this client supports.
pub fn parse_id_string(id: &[u8; ID_LENGTH]) -> Result<ServerIdent> {
    if id[0..4] != CLIENT_ID[0..4] {
        return Err(RserveError::InvalidId);
    }
    if id[8..12] != CLIENT_ID[8..12] || id[4..8] > CLIENT_ID[4..8] {
        return Err(RserveError::ProtocolNotSupported);
    }

    let mut ident = ServerIdent::default();
    let mut i = 12;
    while i < ID_LENGTH {
        let token = &id[i..i + 4];
        match token {
            b"ARuc" => {
                ident.auth_required = true;
                ident.crypt_auth = true;
            }
            b"ARpt" => {
                ident.auth_required = true;
                ident.plain_auth = true;
            }
            _ if token[0] == b'K' => {
                ident.salt = Some([token[1], token[2]]);
            }
            _ => {}
        }
        i += 4;
    }
    Ok(ident)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id_with(tokens: &[u8]) -> [u8; ID_LENGTH] {
        let mut id = [b'-'; ID_LENGTH];
        id[0..12].copy_from_slice(CLIENT_ID);
        id[12..12 + tokens.len()].copy_from_slice(tokens);
        id
    }

    #[test]
    fn test_plain_greeting() {
        let ident = parse_id_string(&id_with(b"ARpt")).unwrap();
        assert!(ident.auth_required);
        assert!(ident.plain_auth);
        assert!(!ident.crypt_auth);
        assert_eq!(ident.salt, None);
    }

    #[test]
    fn test_no_auth_greeting() {
        let ident = parse_id_string(&id_with(b"")).unwrap();
        assert_eq!(ident, ServerIdent::default());
    }

    #[test]
    fn test_crypt_greeting_with_salt() {
        let ident = parse_id_string(&id_with(b"ARucKab ")).unwrap();
        assert!(ident.auth_required);
        assert!(ident.crypt_auth);
        assert!(!ident.plain_auth);
        assert_eq!(ident.salt, Some([b'a', b'b']));
    }

    #[test]
    fn test_both_auth_modes() {
        let ident = parse_id_string(&id_with(b"ARucARpt")).unwrap();
        assert!(ident.crypt_auth);
        assert!(ident.plain_auth);
    }

    #[test]
    fn test_wrong_magic() {
        let mut id = id_with(b"ARpt");
        id[0..4].copy_from_slice(b"Xsrv");
        assert!(matches!(
            parse_id_string(&id),
            Err(RserveError::InvalidId)
        ));
    }

    #[test]
    fn test_newer_version_rejected() {
        let mut id = id_with(b"ARpt");
        id[4..8].copy_from_slice(b"0104");
        assert!(matches!(
            parse_id_string(&id),
            Err(RserveError::ProtocolNotSupported)
        ));
    }

    #[test]
    fn test_older_version_accepted() {
        let mut id = id_with(b"");
        id[4..8].copy_from_slice(b"0102");
        assert!(parse_id_string(&id).is_ok());
    }

    #[test]
    fn test_wrong_transport_id() {
        let mut id = id_with(b"");
        id[8..12].copy_from_slice(b"QAP2");
        assert!(matches!(
            parse_id_string(&id),
            Err(RserveError::ProtocolNotSupported)
        ));
    }
}
