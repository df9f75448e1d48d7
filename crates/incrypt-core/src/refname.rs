//! Reference-name codec.
//!
//! A cleartext ref name is sealed (SHA-1 prefix, then AES-CBC) and
//! base64-encoded into a filesystem-safe token stored as
//! `refs/heads/<token>` on the encrypted side. `~N`/`^N` revision suffixes
//! pass through in the clear. Anything that fails any decoding step is
//! simply not one of ours.

use base64::alphabet::Alphabet;
use base64::engine::{GeneralPurpose, general_purpose};
use base64::Engine;

use crate::crypto::{self, RepoKey};

/// Standard base64 with `/` swapped for `#`: git forbids `/`-ambiguous and
/// control characters in a single ref component, `+`/`#`/`=` are all fine.
const TOKEN_ALPHABET: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+#";

fn token_engine() -> GeneralPurpose {
    let alphabet = Alphabet::new(TOKEN_ALPHABET).expect("valid 64-character alphabet");
    GeneralPurpose::new(&alphabet, general_purpose::PAD)
}

/// Split `name` into the ref proper and an optional `~`/`^` revision suffix.
fn split_suffix(name: &str) -> (&str, &str) {
    match name.find(['~', '^']) {
        Some(pos) => name.split_at(pos),
        None => (name, ""),
    }
}

/// Encrypt a cleartext ref name (or revision expression) into its remote
/// form, e.g. `refs/heads/master~2` → `refs/heads/<token>~2`.
pub fn encrypt(key: &RepoKey, name: &str) -> String {
    let (base, suffix) = split_suffix(name);
    let token = token_engine().encode(crypto::seal(key, base.as_bytes()));
    format!("refs/heads/{token}{suffix}")
}

/// Decrypt a remote ref name back to cleartext. Returns `None` for anything
/// this key does not manage (foreign refs, the metadata branch, corrupted
/// tokens) so callers can skip them silently.
pub fn decrypt(key: &RepoKey, name: &str) -> Option<String> {
    let (base, suffix) = split_suffix(name);
    let token = base.rsplit('/').next()?;
    let sealed = token_engine().decode(token).ok()?;
    let clear = crypto::open(key, &sealed).ok()?;
    let clear = String::from_utf8(clear).ok()?;
    Some(format!("{clear}{suffix}"))
}
