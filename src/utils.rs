//! # Utility Functions Module
//!
//! Piccole funzioni di supporto condivise da builder, probe ed engine:
//! costruzione di vettori di argomenti, arrotondamenti e aritmetica sulle
//! dimensioni video.

use std::time::Duration;

/// Converts a vector of string-like items to Vec<String>.
///
/// Used to build external tool argument lists without repetitive
/// `.to_string()` calls.
///
/// # Example
/// ```rust
/// use video_scripy::utils::to_string_vec;
///
/// let fps = 29.97;
/// let args = to_string_vec(["-r".to_string(), fps.to_string()]);
/// assert_eq!(args, vec!["-r", "29.97"]);
/// ```
pub fn to_string_vec<T, I>(items: I) -> Vec<String>
where
    T: ToString,
    I: IntoIterator<Item = T>,
{
    items.into_iter().map(|item| item.to_string()).collect()
}

/// Macro for convenient argument building with mixed types.
///
/// # Example
/// ```rust
/// use video_scripy::args;
///
/// let fps = 25;
/// let args = args!["-r", fps, "-y"];
/// assert_eq!(args, vec!["-r", "25", "-y"]);
/// ```
#[macro_export]
macro_rules! args {
    [$($item:expr),* $(,)?] => {
        $crate::utils::to_string_vec::<&dyn ::std::fmt::Display, _>([$(&$item as &dyn ::std::fmt::Display),*])
    };
}

/// Arrotonda a `places` cifre decimali
pub fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round() / factor
}

/// Parse a rational like `30000/1001` (or a plain number) into a decimal
/// rounded to 2 places.
pub fn parse_rational(text: &str) -> Option<f64> {
    let value = match text.split_once('/') {
        Some((num, denom)) => {
            let num: f64 = num.trim().parse().ok()?;
            let denom: f64 = denom.trim().parse().ok()?;
            if denom == 0.0 {
                return None;
            }
            num / denom
        }
        None => text.trim().parse().ok()?,
    };
    Some(round_to(value, 2))
}

/// Porta una dimensione al numero pari successivo (richiesto dagli encoder)
pub fn ceil_even(value: u32) -> u32 {
    if value % 2 != 0 {
        value + 1
    } else {
        value
    }
}

pub fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Reduce `width:height` to its simplest ratio, e.g. 1920x1080 -> 16:9
pub fn aspect_ratio(width: u32, height: u32) -> (u32, u32) {
    let divisor = gcd(width, height).max(1);
    (width / divisor, height / divisor)
}

/// Elapsed time as `H:MM:SS.mmm`
pub fn format_elapsed(elapsed: Duration) -> String {
    let millis = elapsed.as_millis();
    let secs = millis / 1_000;
    format!(
        "{}:{:02}:{:02}.{:03}",
        secs / 3_600,
        (secs / 60) % 60,
        secs % 60,
        millis % 1_000
    )
}
