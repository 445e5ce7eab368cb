use crate::error::Error;

pub(crate) const PERMESSAGE_DEFLATE: &str = "permessage-deflate";
const CLIENT_NO_CONTEXT_TAKEOVER: &str = "client_no_context_takeover";
const SERVER_NO_CONTEXT_TAKEOVER: &str = "server_no_context_takeover";
const CLIENT_MAX_WINDOW_BITS: &str = "client_max_window_bits";
const SERVER_MAX_WINDOW_BITS: &str = "server_max_window_bits";

const MIN_WINDOW_BITS: u8 = 8;
const MAX_WINDOW_BITS: u8 = 15;

/// Locally configured permessage-deflate parameters.
///
/// The no-context-takeover flags trade compression ratio for memory: a side
/// that resets its context after every message never holds a dictionary
/// between messages, at the cost of re-learning the data on each one.
/// Window bits closer to 15 compress better and use more memory, closer to
/// 8 the other way around.
#[derive(Debug, Clone)]
pub struct DeflateOptions {
    /// Require the server to reset its compression context after every
    /// message (and, on the server side, volunteer to do so).
    pub server_no_context_takeover: bool,
    /// The client-direction counterpart of `server_no_context_takeover`.
    pub client_no_context_takeover: bool,
    /// Upper bound on the LZ77 window the server compresses with.
    pub server_max_window_bits: Option<u8>,
    /// Upper bound on the LZ77 window the client compresses with.
    pub client_max_window_bits: Option<u8>,
    /// Hard cap on the bytes a single message may inflate to.
    pub max_decompression_size: usize,
}

impl Default for DeflateOptions {
    fn default() -> Self {
        DeflateOptions {
            server_no_context_takeover: false,
            client_no_context_takeover: false,
            server_max_window_bits: None,
            client_max_window_bits: None,
            max_decompression_size: 64 << 20,
        }
    }
}

impl DeflateOptions {
    pub fn validate(&self) -> Result<(), Error> {
        for bits in [self.server_max_window_bits, self.client_max_window_bits]
            .into_iter()
            .flatten()
        {
            if !(MIN_WINDOW_BITS..=MAX_WINDOW_BITS).contains(&bits) {
                return Err(Error::InvalidMaxWindowBits);
            }
        }
        Ok(())
    }

    /// Serialises the client offer for the Sec-WebSocket-Extensions
    /// request header.
    pub fn offer(&self) -> String {
        let mut value = String::from(PERMESSAGE_DEFLATE);
        if self.server_no_context_takeover {
            value.push_str("; ");
            value.push_str(SERVER_NO_CONTEXT_TAKEOVER);
        }
        if let Some(bits) = self.server_max_window_bits {
            value.push_str(&format!("; {}={}", SERVER_MAX_WINDOW_BITS, bits));
        }
        if self.client_no_context_takeover {
            value.push_str("; ");
            value.push_str(CLIENT_NO_CONTEXT_TAKEOVER);
        }
        if let Some(bits) = self.client_max_window_bits {
            value.push_str(&format!("; {}={}", CLIENT_MAX_WINDOW_BITS, bits));
        }
        value
    }
}

/// The accepted parameter set for one connection, with both window sizes
/// already resolved for the local role: the compressor uses
/// `local_max_window_bits`, the decompressor `remote_max_window_bits`.
/// permessage-deflate owns the RSV1 bit.
#[derive(Debug, Clone, Copy)]
pub(crate) struct NegotiatedDeflate {
    pub local_max_window_bits: u8,
    pub remote_max_window_bits: u8,
    /// Reset the compressor at every end of message.
    pub compress_reset: bool,
    /// Reset the decompressor at every end of message.
    pub decompress_reset: bool,
    pub max_decompression_size: usize,
}

/// `client_max_window_bits` may legally appear in an offer without a value,
/// meaning "I support any bound you pick".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OfferedWindowBits {
    NotSpecified,
    Specified(u8),
}

#[derive(Debug, Default)]
struct DeflateOffer {
    server_no_context_takeover: bool,
    client_no_context_takeover: bool,
    server_max_window_bits: Option<u8>,
    client_max_window_bits: Option<OfferedWindowBits>,
}

fn strip_quotes(value: &str) -> &str {
    let value = value.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

fn parse_window_bits(name: &str, value: &str) -> Result<u8, Error> {
    let bits = strip_quotes(value)
        .parse::<u8>()
        .map_err(|_| Error::InvalidParameterValue(name.to_string()))?;
    if !(MIN_WINDOW_BITS..=MAX_WINDOW_BITS).contains(&bits) {
        return Err(Error::InvalidParameterValue(name.to_string()));
    }
    Ok(bits)
}

/// Parses one `permessage-deflate; param; param=value` element. Duplicate
/// and unknown parameters fail the whole negotiation, they are never
/// silently dropped.
fn parse_offer<'a>(params: impl Iterator<Item = &'a str>) -> Result<DeflateOffer, Error> {
    let mut offer = DeflateOffer::default();

    for param in params {
        let param = param.trim();
        let (name, value) = match param.split_once('=') {
            Some((name, value)) => (name.trim(), Some(value)),
            None => (param, None),
        };

        match name {
            SERVER_NO_CONTEXT_TAKEOVER => {
                if offer.server_no_context_takeover {
                    return Err(Error::DuplicateParameter(name.to_string()));
                }
                if value.is_some() {
                    return Err(Error::InvalidParameterValue(name.to_string()));
                }
                offer.server_no_context_takeover = true;
            }
            CLIENT_NO_CONTEXT_TAKEOVER => {
                if offer.client_no_context_takeover {
                    return Err(Error::DuplicateParameter(name.to_string()));
                }
                if value.is_some() {
                    return Err(Error::InvalidParameterValue(name.to_string()));
                }
                offer.client_no_context_takeover = true;
            }
            SERVER_MAX_WINDOW_BITS => {
                if offer.server_max_window_bits.is_some() {
                    return Err(Error::DuplicateParameter(name.to_string()));
                }
                // This parameter always requires a value, RFC 7692 7.1.2.1
                let value = value.ok_or_else(|| Error::InvalidParameterValue(name.to_string()))?;
                offer.server_max_window_bits = Some(parse_window_bits(name, value)?);
            }
            CLIENT_MAX_WINDOW_BITS => {
                if offer.client_max_window_bits.is_some() {
                    return Err(Error::DuplicateParameter(name.to_string()));
                }
                offer.client_max_window_bits = Some(match value {
                    Some(value) => OfferedWindowBits::Specified(parse_window_bits(name, value)?),
                    None => OfferedWindowBits::NotSpecified,
                });
            }
            other => return Err(Error::UnknownExtensionParameter(other.to_string())),
        }
    }

    Ok(offer)
}

/// Splits the `Sec-WebSocket-Extensions` values into ordered
/// permessage-deflate offers. Offers for extensions we don't implement are
/// skipped, the peer simply won't see them echoed.
fn parse_deflate_offers(header_values: &[String]) -> Result<Vec<DeflateOffer>, Error> {
    let mut offers = Vec::new();

    for value in header_values {
        for element in value.split(',') {
            let mut parts = element.split(';');
            match parts.next() {
                Some(name) if name.trim() == PERMESSAGE_DEFLATE => {
                    offers.push(parse_offer(parts)?);
                }
                _ => continue,
            }
        }
    }

    Ok(offers)
}

/// Server-side negotiation: walks the client's offers in order and accepts
/// the first one compatible with the local configuration. Returns the
/// accepted parameter set plus the response header value, or `None` when
/// every offer had to be declined.
pub(crate) fn negotiate_server(
    local: &DeflateOptions,
    header_values: &[String],
) -> Result<Option<(NegotiatedDeflate, String)>, Error> {
    for offer in parse_deflate_offers(header_values)? {
        if let Some(accepted) = accept_offer(local, &offer) {
            return Ok(Some(accepted));
        }
    }
    Ok(None)
}

fn accept_offer(
    local: &DeflateOptions,
    offer: &DeflateOffer,
) -> Option<(NegotiatedDeflate, String)> {
    let server_no_context_takeover =
        local.server_no_context_takeover || offer.server_no_context_takeover;
    let client_no_context_takeover =
        local.client_no_context_takeover || offer.client_no_context_takeover;

    // (echoed, effective) for the server direction. An offered bound we
    // never configured a compressor limit for is declined rather than
    // silently ignored, the client is free to retry with another offer.
    let server_bits = match (local.server_max_window_bits, offer.server_max_window_bits) {
        (None, None) => None,
        (None, Some(_)) => return None,
        (Some(a), None) => Some(a),
        (Some(a), Some(b)) => Some(a.min(b)),
    };

    // A local bound on the client's window can only be enforced when the
    // client declared support by offering the parameter.
    let client_bits = match (local.client_max_window_bits, offer.client_max_window_bits) {
        (None, None) => None,
        (None, Some(OfferedWindowBits::NotSpecified)) => Some(MAX_WINDOW_BITS),
        (None, Some(OfferedWindowBits::Specified(b))) => Some(b),
        (Some(_), None) => return None,
        (Some(a), Some(OfferedWindowBits::NotSpecified)) => Some(a),
        (Some(a), Some(OfferedWindowBits::Specified(b))) => Some(a.min(b)),
    };

    let mut response = String::from(PERMESSAGE_DEFLATE);
    if server_no_context_takeover {
        response.push_str("; ");
        response.push_str(SERVER_NO_CONTEXT_TAKEOVER);
    }
    if let Some(bits) = server_bits {
        response.push_str(&format!("; {}={}", SERVER_MAX_WINDOW_BITS, bits));
    }
    if client_no_context_takeover {
        response.push_str("; ");
        response.push_str(CLIENT_NO_CONTEXT_TAKEOVER);
    }
    if let Some(bits) = client_bits {
        response.push_str(&format!("; {}={}", CLIENT_MAX_WINDOW_BITS, bits));
    }

    let negotiated = NegotiatedDeflate {
        local_max_window_bits: server_bits.unwrap_or(MAX_WINDOW_BITS),
        remote_max_window_bits: client_bits.unwrap_or(MAX_WINDOW_BITS),
        compress_reset: server_no_context_takeover,
        decompress_reset: client_no_context_takeover,
        max_decompression_size: local.max_decompression_size,
    };

    Some((negotiated, response))
}

/// Client-side validation of the server's response against what we asked
/// for. A missing header means the extension is simply inactive.
pub(crate) fn accept_client(
    requested: &DeflateOptions,
    header_values: &[String],
) -> Result<Option<NegotiatedDeflate>, Error> {
    let mut responses = parse_deflate_offers(header_values)?;

    let response = match responses.len() {
        0 => return Ok(None),
        1 => responses.remove(0),
        // Two accepted extension instances would both claim RSV1.
        _ => return Err(Error::IncompatibleExtensions),
    };

    if requested.server_no_context_takeover && !response.server_no_context_takeover {
        return Err(Error::InvalidServerResponse(format!(
            "{} was requested but not granted",
            SERVER_NO_CONTEXT_TAKEOVER
        )));
    }

    let remote_max_window_bits = match (requested.server_max_window_bits, response.server_max_window_bits) {
        (Some(_), None) => {
            return Err(Error::InvalidServerResponse(format!(
                "{} was requested but the response omits it",
                SERVER_MAX_WINDOW_BITS
            )))
        }
        (Some(requested_bits), Some(bits)) if bits > requested_bits => {
            return Err(Error::InvalidServerResponse(format!(
                "{}={} exceeds the requested bound of {}",
                SERVER_MAX_WINDOW_BITS, bits, requested_bits
            )))
        }
        (_, Some(bits)) => bits,
        (None, None) => MAX_WINDOW_BITS,
    };

    let local_max_window_bits = match (requested.client_max_window_bits, response.client_max_window_bits) {
        (Some(_), None) => {
            return Err(Error::InvalidServerResponse(format!(
                "{} was requested but the response omits it",
                CLIENT_MAX_WINDOW_BITS
            )))
        }
        (_, Some(OfferedWindowBits::NotSpecified)) => {
            return Err(Error::InvalidServerResponse(format!(
                "{} requires an explicit value in a response",
                CLIENT_MAX_WINDOW_BITS
            )))
        }
        (Some(requested_bits), Some(OfferedWindowBits::Specified(bits))) if bits > requested_bits => {
            return Err(Error::InvalidServerResponse(format!(
                "{}={} exceeds the requested bound of {}",
                CLIENT_MAX_WINDOW_BITS, bits, requested_bits
            )))
        }
        (_, Some(OfferedWindowBits::Specified(bits))) => bits,
        (None, None) => MAX_WINDOW_BITS,
    };

    Ok(Some(NegotiatedDeflate {
        local_max_window_bits,
        remote_max_window_bits,
        // The server declaring server_no_context_takeover commits to
        // resetting its compressor, so our decompressor resets in step.
        decompress_reset: response.server_no_context_takeover,
        compress_reset: requested.client_no_context_takeover || response.client_no_context_takeover,
        max_decompression_size: requested.max_decompression_size,
    }))
}
