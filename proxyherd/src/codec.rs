//! Wire protocol: parsing and formatting of `IAMAT`, `WHATSAT`, `AT`, and
//! the `?` error reply. Pure functions, no I/O.

use crate::config::{MAX_INFO_LIMIT, MAX_RADIUS_KM};

/// A parsed client or peer command. `Malformed` carries the original line
/// verbatim so the session handler can echo it back in a `?` reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    IAmAt {
        client_id: String,
        location: String,
        client_time: String,
    },
    WhatsAt {
        client_id: String,
        radius_km: u32,
        max_results: u32,
    },
    At(AtRecord),
    Malformed,
}

/// The fields carried by an `AT` line, independent of where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct AtRecord {
    pub origin_server: String,
    pub signed_skew: String,
    pub client_id: String,
    pub location: String,
    pub client_time: String,
}

/// Parse one line (without its trailing `\n`) into a [`Command`].
pub fn parse_line(line: &str) -> Command {
    let parts: Vec<&str> = line.split_whitespace().collect();
    match parts.first().copied() {
        Some("IAMAT") => parse_iamat(&parts),
        Some("WHATSAT") => parse_whatsat(&parts),
        Some("AT") => parse_at(&parts),
        _ => Command::Malformed,
    }
}

fn parse_iamat(parts: &[&str]) -> Command {
    if parts.len() != 4 {
        return Command::Malformed;
    }
    let client_id = parts[1];
    let location = parts[2];
    let client_time = parts[3];

    if client_id.chars().any(char::is_whitespace) {
        return Command::Malformed;
    }
    if !is_valid_location(location) {
        return Command::Malformed;
    }
    if client_time.parse::<f64>().map(f64::is_finite) != Ok(true) {
        return Command::Malformed;
    }

    Command::IAmAt {
        client_id: client_id.to_string(),
        location: location.to_string(),
        client_time: client_time.to_string(),
    }
}

fn parse_whatsat(parts: &[&str]) -> Command {
    if parts.len() != 4 {
        return Command::Malformed;
    }
    let client_id = parts[1];
    if client_id.chars().any(char::is_whitespace) {
        return Command::Malformed;
    }
    let Ok(radius_km) = parts[2].parse::<i64>() else {
        return Command::Malformed;
    };
    let Ok(max_results) = parts[3].parse::<i64>() else {
        return Command::Malformed;
    };
    if radius_km < 0 || radius_km > MAX_RADIUS_KM as i64 {
        return Command::Malformed;
    }
    if max_results < 0 || max_results > MAX_INFO_LIMIT as i64 {
        return Command::Malformed;
    }

    Command::WhatsAt {
        client_id: client_id.to_string(),
        radius_km: radius_km as u32,
        max_results: max_results as u32,
    }
}

fn parse_at(parts: &[&str]) -> Command {
    if parts.len() < 6 {
        return Command::Malformed;
    }
    let signed_skew = parts[2];
    let has_sign = signed_skew.starts_with('+') || signed_skew.starts_with('-');
    if !has_sign {
        return Command::Malformed;
    }
    if signed_skew[1..].parse::<f64>().is_err() {
        return Command::Malformed;
    }

    Command::At(AtRecord {
        origin_server: parts[1].to_string(),
        signed_skew: signed_skew.to_string(),
        client_id: parts[3].to_string(),
        location: parts[4].to_string(),
        client_time: parts[5].to_string(),
    })
}

/// `^[+-]\d+\.\d+[+-]\d+\.\d+$`, checked without pulling in a regex engine.
fn is_valid_location(s: &str) -> bool {
    let Some(split) = find_longitude_sign(s) else {
        return false;
    };
    let (lat, lon) = s.split_at(split);
    is_signed_decimal(lat) && is_signed_decimal(lon)
}

/// Index of the sign that starts the longitude half: the first `+`/`-`
/// after position 0.
fn find_longitude_sign(s: &str) -> Option<usize> {
    s.char_indices()
        .skip(1)
        .find(|(_, c)| *c == '+' || *c == '-')
        .map(|(i, _)| i)
}

fn is_signed_decimal(s: &str) -> bool {
    let Some(rest) = s.strip_prefix('+').or_else(|| s.strip_prefix('-')) else {
        return false;
    };
    let Some((int_part, frac_part)) = rest.split_once('.') else {
        return false;
    };
    !int_part.is_empty()
        && !frac_part.is_empty()
        && int_part.bytes().all(|b| b.is_ascii_digit())
        && frac_part.bytes().all(|b| b.is_ascii_digit())
}

/// Format a signed seconds value the way `AT` lines require: an explicit
/// `+` for zero or positive, `-` for negative, otherwise the language's
/// default decimal formatting (no forced precision).
pub fn format_signed_skew(skew: f64) -> String {
    if skew >= 0.0 {
        format!("+{skew}")
    } else {
        format!("{skew}")
    }
}

/// Build the canonical `AT` line an origin server sends for a fresh
/// `IAMAT`. This exact string is what gets stored, flooded, and echoed.
pub fn format_at_line(
    origin_server: &str,
    skew: f64,
    client_id: &str,
    location: &str,
    client_time: &str,
) -> String {
    format!(
        "AT {origin_server} {} {client_id} {location} {client_time}",
        format_signed_skew(skew)
    )
}

/// `? <original line>` — used for malformed commands and unknown clients.
pub fn format_error_reply(original_line: &str) -> String {
    format!("? {original_line}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_iamat() {
        let cmd = parse_line("IAMAT kiwi.cs.ucla.edu +34.068930-118.445127 1520023934.918963997");
        assert_eq!(
            cmd,
            Command::IAmAt {
                client_id: "kiwi.cs.ucla.edu".into(),
                location: "+34.068930-118.445127".into(),
                client_time: "1520023934.918963997".into(),
            }
        );
    }

    #[test]
    fn rejects_location_missing_fraction() {
        let cmd = parse_line("IAMAT c +34-118 100");
        assert_eq!(cmd, Command::Malformed);
    }

    #[test]
    fn rejects_location_missing_fraction_one_side() {
        let cmd = parse_line("IAMAT c +34.0-118 100");
        assert_eq!(cmd, Command::Malformed);
    }

    #[test]
    fn empty_line_is_malformed() {
        assert_eq!(parse_line(""), Command::Malformed);
    }

    #[test]
    fn whatsat_boundaries() {
        assert!(matches!(
            parse_line("WHATSAT c 0 0"),
            Command::WhatsAt { radius_km: 0, max_results: 0, .. }
        ));
        assert!(matches!(
            parse_line("WHATSAT c 50 20"),
            Command::WhatsAt { radius_km: 50, max_results: 20, .. }
        ));
        assert_eq!(parse_line("WHATSAT c 51 5"), Command::Malformed);
        assert_eq!(parse_line("WHATSAT c 10 21"), Command::Malformed);
    }

    #[test]
    fn at_requires_signed_skew() {
        assert_eq!(
            parse_line("AT Bailey 0.5 c +1.0+1.0 100"),
            Command::Malformed
        );
        assert!(matches!(parse_line("AT Bailey +0.5 c +1.0+1.0 100"), Command::At(_)));
    }

    #[test]
    fn format_skew_always_signs() {
        assert_eq!(format_signed_skew(0.0), "+0");
        assert_eq!(format_signed_skew(0.081036003), "+0.081036003");
        assert_eq!(format_signed_skew(-1.5), "-1.5");
    }

    #[test]
    fn echo_law_round_trip() {
        let line = format_at_line(
            "Bailey",
            0.081036003,
            "kiwi.cs.ucla.edu",
            "+34.068930-118.445127",
            "1520023934.918963997",
        );
        assert_eq!(
            line,
            "AT Bailey +0.081036003 kiwi.cs.ucla.edu +34.068930-118.445127 1520023934.918963997"
        );
        assert!(matches!(parse_line(&line), Command::At(_)));
    }
}
