//! Bucket keys for rate limiting.
//!
//! A bucket key names the counter a request is charged against. Keys have the
//! form `rl:<category>:<identifier>`, where the identifier is:
//! - the bearer credential from the `Authorization` header, if the header
//!   starts with exactly `Bearer `;
//! - otherwise the peer network address, if one is known;
//! - otherwise the literal `anonymous`.
//!
//! Derivation only ever sees the header map and the network address. Identity
//! fields that other middleware may have attached to the request are not
//! reachable from here: whether such a field is present is up to the client,
//! and omitting it used to move a caller into a fresh bucket on every request.
//!
//! Header names are looked up through [`HeaderMap`], which stores them
//! lowercased, so `Authorization` and `authorization` are the same header. The
//! scheme prefix on the value is matched case-sensitively.

use std::borrow::Cow;

use derive_more::{Debug, Display};
use http::{HeaderMap, header::AUTHORIZATION};

/// Scheme prefix identifying a bearer credential.
pub const BEARER_PREFIX: &str = "Bearer ";

/// Identifier for requests with neither a bearer credential nor an address.
pub const ANONYMOUS: &str = "anonymous";

/// Namespace every bucket key starts with.
pub const KEY_NAMESPACE: &str = "rl";

/// The logical rate limit a request is counted against.
///
/// Categories are opaque labels: they are neither validated nor escaped, so a
/// category containing `:` produces an ambiguous key. Callers should pick
/// labels from a fixed set, such as the constants on this type.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Display)]
pub struct Category(Cow<'static, str>);

impl Category {
    /// Comment creation.
    pub const COMMENTS: Category = Category::from_static("comments");

    /// Post creation.
    pub const POSTS: Category = Category::from_static("posts");

    /// General API traffic.
    pub const REQUESTS: Category = Category::from_static("requests");

    /// Create a category from a static label.
    pub const fn from_static(label: &'static str) -> Self {
        Self(Cow::Borrowed(label))
    }

    /// Create a category from arbitrary text.
    pub fn new(label: impl Into<Cow<'static, str>>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for Category {
    fn from(label: &'static str) -> Self {
        Self::from_static(label)
    }
}

impl From<String> for Category {
    fn from(label: String) -> Self {
        Self::new(label)
    }
}

impl From<&Category> for Category {
    fn from(category: &Category) -> Self {
        category.clone()
    }
}

/// Which request signal an [`Identifier`] was taken from.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display)]
pub enum Source {
    #[display("bearer")]
    Bearer,

    #[display("address")]
    Address,

    #[display("anonymous")]
    Anonymous,
}

/// The caller identity a bucket key is scoped to.
///
/// Bearer credentials are redacted from `Debug` output; use
/// [`Identifier::expose`] to read the value.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum Identifier {
    /// Everything after `Bearer ` in the `Authorization` header, untrimmed.
    #[debug("Bearer([redacted])")]
    Bearer(String),

    /// The peer network address.
    Address(String),

    /// Neither signal was available.
    Anonymous,
}

impl Identifier {
    /// Identify the caller of a request.
    ///
    /// Only the first `Authorization` value is considered. A value that is
    /// not visible ASCII, or that does not start with exactly
    /// [`BEARER_PREFIX`], is ignored and the address is used instead. An empty
    /// address counts as no address.
    pub fn from_request(headers: &HeaderMap, network_address: Option<&str>) -> Self {
        let credential = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix(BEARER_PREFIX));
        if let Some(credential) = credential {
            return Identifier::Bearer(credential.to_owned());
        }

        match network_address {
            Some(address) if !address.is_empty() => Identifier::Address(address.to_owned()),
            _ => Identifier::Anonymous,
        }
    }

    /// The signal this identifier came from.
    pub fn source(&self) -> Source {
        match self {
            Identifier::Bearer(_) => Source::Bearer,
            Identifier::Address(_) => Source::Address,
            Identifier::Anonymous => Source::Anonymous,
        }
    }

    /// View the identifier text as it appears in a bucket key.
    pub fn expose(&self) -> &str {
        match self {
            Identifier::Bearer(credential) => credential,
            Identifier::Address(address) => address,
            Identifier::Anonymous => ANONYMOUS,
        }
    }
}

/// The key of a rate limit bucket: `rl:<category>:<identifier>`.
///
/// Keys usually embed a bearer credential, so this type does not print its
/// value; use [`BucketKey::expose`] to hand it to a counter store.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Display)]
#[debug("[redacted]")]
#[display("[redacted]")]
pub struct BucketKey(String);

impl BucketKey {
    pub fn new(category: &Category, identifier: &Identifier) -> Self {
        let identifier = identifier.expose();
        BucketKey(format!("{KEY_NAMESPACE}:{category}:{identifier}"))
    }

    /// View the interior value of the key.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl From<BucketKey> for String {
    fn from(key: BucketKey) -> Self {
        key.0
    }
}

/// Derive the bucket key for a request.
///
/// This is total: missing or malformed headers fall back to the network
/// address, then to [`ANONYMOUS`].
pub fn derive_key(
    headers: &HeaderMap,
    network_address: Option<&str>,
    category: &Category,
) -> BucketKey {
    let identifier = Identifier::from_request(headers, network_address);
    BucketKey::new(category, &identifier)
}
