//! Canned answers for keyboard-interactive authentication.
//!
//! Every prompt must be answered by a configured interaction whose
//! `question` it contains; a `google-auth` interaction answers with the
//! current TOTP code for its base32 secret (RFC 6238, SHA-1, 30s, 6 digits).

use ring::hmac;
use sshw_core::KeyboardInteraction;

use crate::error::SshError;

const TOTP_STEP_SECS: u64 = 30;
const TOTP_DIGITS: u32 = 6;

/// Answers `prompts` in order, or `None` if some prompt has no match.
pub fn answer_prompts<S: AsRef<str>>(
    interactions: &[KeyboardInteraction],
    prompts: &[S],
    unix_time: u64,
) -> Result<Option<Vec<String>>, SshError> {
    let mut answers = Vec::with_capacity(prompts.len());
    for prompt in prompts {
        let prompt = prompt.as_ref();
        let Some(interaction) = interactions
            .iter()
            .find(|i| prompt.contains(i.question.as_str()))
        else {
            return Ok(None);
        };
        let answer = if interaction.google_auth {
            totp(&interaction.answer, unix_time)?
        } else {
            interaction.answer.clone()
        };
        answers.push(answer);
    }
    Ok(Some(answers))
}

/// Time-based one-time password for a base32 `secret`.
pub fn totp(secret: &str, unix_time: u64) -> Result<String, SshError> {
    let key = decode_base32(secret)
        .ok_or_else(|| SshError::Key("google-auth secret is not base32".to_string()))?;
    let counter = unix_time / TOTP_STEP_SECS;
    let tag = hmac::sign(
        &hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, &key),
        &counter.to_be_bytes(),
    );
    let digest = tag.as_ref();

    let offset = usize::from(digest[digest.len() - 1] & 0x0f);
    let binary = u32::from_be_bytes([
        digest[offset] & 0x7f,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);
    let code = binary % 10u32.pow(TOTP_DIGITS);
    Ok(format!("{code:0width$}", width = TOTP_DIGITS as usize))
}

/// RFC 4648 base32, case-insensitive, ignoring spaces and padding.
fn decode_base32(input: &str) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    let mut buffer: u32 = 0;
    let mut bits = 0;
    for c in input.chars().filter(|c| !c.is_whitespace() && *c != '=') {
        let value = match c.to_ascii_uppercase() {
            c @ 'A'..='Z' => c as u32 - 'A' as u32,
            c @ '2'..='7' => c as u32 - '2' as u32 + 26,
            _ => return None,
        };
        buffer = (buffer << 5) | value;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push((buffer >> bits) as u8);
            buffer &= (1 << bits) - 1;
        }
    }
    (!out.is_empty()).then_some(out)
}
