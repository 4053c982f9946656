//! Request parameter parsing.

use crate::*;
use std::collections::HashMap;

/// Query parameters of one operation request.
#[derive(Debug, Default)]
pub struct Params {
    op: &'static str,
    map: HashMap<String, String>,
}

impl Params {
    /// Wrap the decoded query of an `op` request.
    pub fn new(op: &'static str, map: HashMap<String, String>) -> Self {
        Self { op, map }
    }

    /// A parameter that may be absent.
    pub fn optional(&self, name: &str) -> Option<&str> {
        self.map.get(name).map(String::as_str)
    }

    /// A parameter that must be present.
    pub fn required(&self, name: &str) -> OpResult<&str> {
        self.optional(name).ok_or_else(|| {
            OpError::malformed(format!(
                "{} requires parameter '{name}'",
                self.op
            ))
        })
    }

    /// A required parameter parsed with [std::str::FromStr].
    pub fn required_parsed<T: std::str::FromStr>(
        &self,
        name: &str,
    ) -> OpResult<T> {
        self.required(name)?.parse().map_err(|_| {
            OpError::malformed(format!(
                "{} parameter '{name}' is not valid",
                self.op
            ))
        })
    }

    /// The requester's listening port.
    pub fn port(&self) -> OpResult<u16> {
        self.required_parsed("port")
    }

    /// The requester's public key.
    pub fn public_key(&self) -> OpResult<PublicKey> {
        let exponent = self.required("publicKeyExponent")?;
        let modulus = self.required("publicKeyModulus")?;
        PublicKey::from_components(exponent, modulus).map_err(|err| {
            OpError::malformed(format!("{} key parameters: {err}", self.op))
        })
    }

    /// A boolean flag, `true` or `false`.
    pub fn flag(&self, name: &str, default: bool) -> OpResult<bool> {
        match self.optional(name) {
            None => Ok(default),
            Some("true") | Some("1") => Ok(true),
            Some("false") | Some("0") => Ok(false),
            Some(_) => Err(OpError::malformed(format!(
                "{} parameter '{name}' must be true or false",
                self.op
            ))),
        }
    }

    /// The metadata label. Validated like a key since it becomes part
    /// of a member name.
    pub fn metakey(&self) -> OpResult<&str> {
        let label = self.required("metakey")?;
        validate_name(label).map_err(|why| {
            OpError::malformed(format!("{} metakey {why}", self.op))
        })?;
        Ok(label)
    }

    /// An optional metadata entry: `metakey` and base64url `meta`, both
    /// or neither.
    pub fn meta(&self) -> OpResult<Option<(String, Vec<u8>)>> {
        use base64::prelude::*;

        let content = match self.optional("meta") {
            None => return Ok(None),
            Some(content) => content,
        };
        let label = self.metakey()?;
        let content = BASE64_URL_SAFE_NO_PAD.decode(content).map_err(|err| {
            OpError::malformed(format!("{} meta: {err}", self.op))
        })?;
        Ok(Some((label.to_string(), content)))
    }
}

/// Reject upload names that could escape the storage directory.
pub fn validate_key(key: &str) -> OpResult<()> {
    validate_name(key)
        .map_err(|why| OpError::malformed(format!("storage key {why}")))
}

/// Accept only canonical content addresses. Anything else in the
/// storage directory (owner records, containers) is never a fragment.
pub fn validate_address(key: &str) -> OpResult<()> {
    validate_key(key)?;
    if !fragstore_archive::is_content_address(key) {
        return Err(OpError::malformed(format!(
            "storage key {key} is not a content address"
        )));
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("is empty");
    }
    if name.contains('/') || name.contains('\\') {
        return Err("contains a path separator");
    }
    if name.starts_with('.') {
        return Err("starts with '.'");
    }
    if name.contains('\0') {
        return Err("contains NUL");
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Params {
        Params::new(
            "STORE",
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn missing_required_names_param_and_op() {
        let err = params(&[]).port().unwrap_err();
        assert_eq!(400, err.status());
        assert_eq!(
            "MalformedRequest: STORE requires parameter 'port'",
            err.to_string()
        );
    }

    #[test]
    fn unparseable() {
        assert!(params(&[("port", "99999")]).port().is_err());
        assert!(params(&[("size", "-1")])
            .required_parsed::<u64>("size")
            .is_err());
        assert_eq!(
            42,
            params(&[("size", "42")])
                .required_parsed::<u64>("size")
                .unwrap()
        );
    }

    #[test]
    fn flags() {
        let p = params(&[("withMeta", "false"), ("bad", "maybe")]);
        assert!(!p.flag("withMeta", true).unwrap());
        assert!(p.flag("absent", true).unwrap());
        assert!(p.flag("bad", true).is_err());
    }

    #[test]
    fn meta_pairs() {
        assert_eq!(None, params(&[("metakey", "x")]).meta().unwrap());
        assert_eq!(
            Some(("x".to_string(), b"hi".to_vec())),
            params(&[("metakey", "x"), ("meta", "aGk")]).meta().unwrap()
        );
        assert!(params(&[("meta", "aGk")]).meta().is_err());
        assert!(params(&[("metakey", "a/b"), ("meta", "aGk")]).meta().is_err());
        assert!(params(&[("metakey", "x"), ("meta", "!!")]).meta().is_err());
    }

    #[test]
    fn keys() {
        let key = "47DEQpj8HBSa-_TImW-5JCeuQeRkm5NMpJWZG3hSuFU";
        assert!(validate_key(key).is_ok());
        assert!(validate_key("abcd.tar.gz").is_ok());
        for bad in ["", "a/b", "a\\b", ".hidden", "..", "a\0b"] {
            assert!(validate_key(bad).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn addresses() {
        let key = fragstore_archive::content_address(b"x");
        assert!(validate_address(&key).is_ok());
        for bad in [
            format!("{key}.owners"),
            format!("{key}.m.meta"),
            "abcd.tar.gz".to_string(),
            "abc".to_string(),
        ] {
            assert_eq!(400, validate_address(&bad).unwrap_err().status());
        }
    }

    #[test]
    fn bad_key_components() {
        let p = params(&[
            ("publicKeyExponent", "65537"),
            ("publicKeyModulus", "zz"),
        ]);
        assert_eq!(400, p.public_key().unwrap_err().status());
    }
}
