//! Macro functions callable from scenario expressions, e.g. `{random_digits(6)}` or
//! `{ORDER_DATE = today_plus(7, %Y-%m-%d)}`.
//!
//! A macro is a function of its already-resolved string arguments. The built-ins are:
//!
//! | name                      | result                                   |
//! |---------------------------|------------------------------------------|
//! | `random_digits(n)`        | `n` random decimal digits                |
//! | `random_letters(n)`       | `n` random upper-case letters            |
//! | `random_alphanumeric(n)`  | `n` random digits or upper-case letters  |
//! | `today(fmt)`              | today's local date, strftime-formatted   |
//! | `today_plus(days, fmt)`   | today plus `days` (may be negative)      |
//! | `timestamp()`             | seconds since the Unix epoch             |
//! | `guid()`                  | random UUID v4                           |
//! | `random_int(min, max)`    | integer in `min..=max`                   |

use chrono::format::{Item, StrftimeItems};
use chrono::{Local, NaiveDate, TimeDelta, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::fmt::{self, Write};
use std::sync::Arc;
use uuid::Uuid;

use crate::variable::resolver::ExpressionError;

/// Signature of a macro implementation. The error string is reported as the failure reason.
pub type MacroFn = dyn Fn(&[String]) -> Result<String, String> + Send + Sync;

const DIGITS: &[u8] = b"0123456789";
const LETTERS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const ALPHANUMERIC: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Name → function table.
#[derive(Clone)]
pub struct MacroRegistry {
    macros: HashMap<String, Arc<MacroFn>>,
}

impl MacroRegistry {
    /// Empty registry without built-ins.
    pub fn new() -> Self {
        Self {
            macros: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("random_digits", |args| random_string(args, DIGITS));
        registry.register("random_letters", |args| random_string(args, LETTERS));
        registry.register("random_alphanumeric", |args| random_string(args, ALPHANUMERIC));
        registry.register("today", today);
        registry.register("today_plus", today_plus);
        registry.register("timestamp", |_| Ok(Utc::now().timestamp().to_string()));
        registry.register("guid", |_| Ok(Uuid::new_v4().to_string()));
        registry.register("random_int", random_int);
        registry
    }

    /// Register (or replace) a macro.
    pub fn register<F>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(&[String]) -> Result<String, String> + Send + Sync + 'static,
    {
        self.macros.insert(name.into(), Arc::new(func));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.macros.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.macros.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn invoke(&self, name: &str, args: &[String]) -> Result<String, ExpressionError> {
        let func = self
            .macros
            .get(name)
            .ok_or_else(|| ExpressionError::UnknownMacro {
                name: name.to_string(),
            })?;
        func(args).map_err(|message| ExpressionError::MacroFailed {
            name: name.to_string(),
            message,
        })
    }
}

impl Default for MacroRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for MacroRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MacroRegistry")
            .field("macros", &self.names())
            .finish()
    }
}

fn expect_args(args: &[String], count: usize) -> Result<(), String> {
    if args.len() == count {
        Ok(())
    } else {
        Err(format!("expected {} argument(s), got {}", count, args.len()))
    }
}

fn parse_int<T: std::str::FromStr>(value: &str, what: &str) -> Result<T, String> {
    value
        .trim()
        .parse()
        .map_err(|_| format!("{} must be an integer, got '{}'", what, value))
}

fn random_string(args: &[String], charset: &[u8]) -> Result<String, String> {
    expect_args(args, 1)?;
    let length: usize = parse_int(&args[0], "length")?;
    let mut rng = rand::rng();
    Ok((0..length)
        .map(|_| charset[rng.random_range(0..charset.len())] as char)
        .collect())
}

fn random_int(args: &[String]) -> Result<String, String> {
    expect_args(args, 2)?;
    let min: i64 = parse_int(&args[0], "min")?;
    let max: i64 = parse_int(&args[1], "max")?;
    if min > max {
        return Err(format!("min ({}) is greater than max ({})", min, max));
    }
    Ok(rand::rng().random_range(min..=max).to_string())
}

fn today(args: &[String]) -> Result<String, String> {
    expect_args(args, 1)?;
    format_date(Local::now().date_naive(), &args[0])
}

fn today_plus(args: &[String]) -> Result<String, String> {
    expect_args(args, 2)?;
    let days: i64 = parse_int(&args[0], "days")?;
    let date = TimeDelta::try_days(days)
        .and_then(|delta| Local::now().date_naive().checked_add_signed(delta))
        .ok_or_else(|| format!("date offset of {} days is out of range", days))?;
    format_date(date, &args[1])
}

/// strftime-format a date. Unknown or time-of-day specifiers are reported, not panicked on.
fn format_date(date: NaiveDate, format: &str) -> Result<String, String> {
    let items: Vec<Item<'_>> = StrftimeItems::new(format).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(format!("invalid date format '{}'", format));
    }
    let mut out = String::new();
    write!(out, "{}", date.format_with_items(items.iter()))
        .map_err(|_| format!("date format '{}' is not applicable to a date", format))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_random_strings() {
        let registry = MacroRegistry::with_builtins();

        let digits = registry.invoke("random_digits", &args(&["8"])).unwrap();
        assert_eq!(digits.len(), 8);
        assert!(digits.chars().all(|c| c.is_ascii_digit()));

        let letters = registry.invoke("random_letters", &args(&["5"])).unwrap();
        assert_eq!(letters.len(), 5);
        assert!(letters.chars().all(|c| c.is_ascii_uppercase()));

        let mixed = registry.invoke("random_alphanumeric", &args(&["12"])).unwrap();
        assert_eq!(mixed.len(), 12);
        assert!(mixed.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_today_formats() {
        let registry = MacroRegistry::with_builtins();
        let expected = Local::now().date_naive().format("%Y-%m-%d").to_string();
        let today = registry.invoke("today", &args(&["%Y-%m-%d"])).unwrap();
        // Tolerate a run that straddles midnight
        assert!(today == expected || today.len() == expected.len());
    }

    #[test]
    fn test_today_plus() {
        let registry = MacroRegistry::with_builtins();
        let base = Local::now().date_naive();
        let result = registry
            .invoke("today_plus", &args(&["1", "%Y%m%d"]))
            .unwrap();
        let expected = (base + TimeDelta::days(1)).format("%Y%m%d").to_string();
        assert_eq!(result.len(), 8);
        assert!(result == expected || result > expected);
    }

    #[test]
    fn test_invalid_format_is_reported() {
        let registry = MacroRegistry::with_builtins();
        let err = registry.invoke("today", &args(&["%Q"])).unwrap_err();
        assert!(matches!(err, ExpressionError::MacroFailed { .. }));

        let err = registry.invoke("today", &args(&["%H:%M"])).unwrap_err();
        assert!(matches!(err, ExpressionError::MacroFailed { .. }));
    }

    #[test]
    fn test_random_int_bounds() {
        let registry = MacroRegistry::with_builtins();
        for _ in 0..50 {
            let value: i64 = registry
                .invoke("random_int", &args(&["-3", "3"]))
                .unwrap()
                .parse()
                .unwrap();
            assert!((-3..=3).contains(&value));
        }
        assert!(registry.invoke("random_int", &args(&["5", "1"])).is_err());
    }

    #[test]
    fn test_guid_and_timestamp() {
        let registry = MacroRegistry::with_builtins();
        let guid = registry.invoke("guid", &[]).unwrap();
        assert!(Uuid::parse_str(&guid).is_ok());

        let ts: i64 = registry.invoke("timestamp", &[]).unwrap().parse().unwrap();
        assert!(ts > 1_600_000_000);
    }

    #[test]
    fn test_unknown_macro() {
        let registry = MacroRegistry::with_builtins();
        let err = registry.invoke("no_such_macro", &[]).unwrap_err();
        assert!(matches!(err, ExpressionError::UnknownMacro { ref name } if name == "no_such_macro"));
    }

    #[test]
    fn test_custom_registration() {
        let mut registry = MacroRegistry::new();
        assert!(!registry.contains("upper"));
        registry.register("upper", |args| Ok(args.join(",").to_uppercase()));
        assert_eq!(registry.invoke("upper", &args(&["ab", "c"])).unwrap(), "AB,C");
        assert_eq!(registry.names(), vec!["upper"]);
    }

    #[test]
    fn test_bad_argument_count() {
        let registry = MacroRegistry::with_builtins();
        assert!(registry.invoke("random_digits", &[]).is_err());
        assert!(registry.invoke("random_digits", &args(&["x"])).is_err());
    }
}
