//! Textual expansion passes applied to a line before it is tokenized.

use crate::alias::AliasTable;
use crate::env::EnvironmentStore;
use crate::lexer::{self, ESCAPE};
use regex::Regex;
use std::sync::LazyLock;

static VARIABLE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("variable name pattern"));

/// Non-empty, letters/digits/underscore only, not starting with a digit.
pub fn is_well_formed_name(name: &str) -> bool {
    VARIABLE_NAME.is_match(name)
}

/// Length of an escape sequence starting at `i`, if there is one.
fn escape_at(chars: &[char], i: usize) -> Option<usize> {
    (chars[i] == ESCAPE && chars.get(i + 1).is_some_and(|&c| lexer::is_escapable(c))).then_some(2)
}

/// Replace every `%NAME%` with the value of `NAME`.
///
/// A pair whose name is undefined or malformed is deleted, percent signs
/// included; scripts rely on this to drop arguments when a variable is
/// absent. Escapes are left in place for the tokenizer, so `^%` survives as a
/// literal percent. A `%` without a partner on the same word is kept, which
/// leaves loop headers such as `for %a in %list%` intact.
pub fn substitute_variables(line: &str, env: &EnvironmentStore) -> String {
    let chars: Vec<char> = line.chars().collect();
    let mut out = String::with_capacity(line.len());
    let mut i = 0;
    while i < chars.len() {
        if let Some(n) = escape_at(&chars, i) {
            out.extend(&chars[i..i + n]);
            i += n;
            continue;
        }
        if chars[i] != '%' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        let mut j = i + 1;
        let mut close = None;
        while j < chars.len() {
            if let Some(n) = escape_at(&chars, j) {
                j += n;
                continue;
            }
            if chars[j] == '%' {
                close = Some(j);
                break;
            }
            if chars[j].is_whitespace() {
                break;
            }
            j += 1;
        }
        let Some(close) = close else {
            out.push('%');
            i += 1;
            continue;
        };
        let name: String = chars[i + 1..close].iter().collect();
        if is_well_formed_name(&name) {
            if let Some(value) = env.get(&name) {
                out.push_str(value);
            }
        }
        i = close + 1;
    }
    out
}

/// Replace the first word with its alias, one level deep.
///
/// Built-in command names are never aliased.
pub fn substitute_alias(line: &str, aliases: &AliasTable, is_builtin: impl Fn(&str) -> bool) -> String {
    let (first, rest) = lexer::split_first_word(line);
    let name = lexer::strip_quotes(first);
    if name.is_empty() || is_builtin(&name) {
        return line.to_string();
    }
    match aliases.get(&name) {
        Some(alias) => format!("{}{}", alias.replacement, rest),
        None => line.to_string(),
    }
}

/// Replace `%0`–`%9` with script arguments; missing ones become `""`.
pub fn substitute_positional(line: &str, args: &[String]) -> String {
    let chars: Vec<char> = line.chars().collect();
    let mut out = String::with_capacity(line.len());
    let mut i = 0;
    while i < chars.len() {
        if let Some(n) = escape_at(&chars, i) {
            out.extend(&chars[i..i + n]);
            i += n;
            continue;
        }
        match (chars[i], chars.get(i + 1).and_then(|c| c.to_digit(10))) {
            ('%', Some(d)) => {
                match args.get(d as usize) {
                    Some(arg) => out.push_str(arg),
                    None => out.push_str("\"\""),
                }
                i += 2;
            }
            (c, _) => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// Replace script-scoped single-letter variables such as `%a`.
///
/// `%a` is only replaced when the next character cannot continue an
/// identifier; `skip` names a variable to leave untouched.
pub fn substitute_script_vars(line: &str, vars: &[(String, String)], skip: Option<&str>) -> String {
    if vars.is_empty() {
        return line.to_string();
    }
    let chars: Vec<char> = line.chars().collect();
    let mut out = String::with_capacity(line.len());
    let mut i = 0;
    while i < chars.len() {
        if let Some(n) = escape_at(&chars, i) {
            out.extend(&chars[i..i + n]);
            i += n;
            continue;
        }
        if chars[i] == '%' {
            if let Some(&letter) = chars.get(i + 1) {
                let ends = chars
                    .get(i + 2)
                    .is_none_or(|&c| !(c.is_alphanumeric() || c == '_'));
                let name = letter.to_string();
                let value = vars
                    .iter()
                    .find(|(var, _)| *var == name && skip != Some(var.as_str()));
                if let (true, Some((_, value))) = (ends && letter.is_alphabetic(), value) {
                    out.push_str(value);
                    i += 2;
                    continue;
                }
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_with(pairs: &[(&str, &str)]) -> EnvironmentStore {
        let mut env = EnvironmentStore::in_memory();
        for (k, v) in pairs {
            env.set_volatile(k, v).unwrap();
        }
        env
    }

    #[test]
    fn test_defined_variable_is_replaced() {
        let env = env_with(&[("foo", "bar")]);
        assert_eq!(substitute_variables("echo %foo%!", &env), "echo bar!");
        assert_eq!(substitute_variables("echo %FOO%", &env), "echo bar");
    }

    #[test]
    fn test_unresolved_reference_disappears_entirely() {
        let env = env_with(&[]);
        assert_eq!(substitute_variables("echo a%missing%b", &env), "echo ab");
        assert_eq!(substitute_variables("echo %1bad% x", &env), "echo  x");
        assert_eq!(substitute_variables("echo %% x", &env), "echo  x");
        assert_eq!(substitute_variables("echo a%b c%", &env), "echo a%b c%");
    }

    #[test]
    fn test_lone_percent_and_escapes_are_kept() {
        let env = env_with(&[("x", "1")]);
        assert_eq!(substitute_variables("echo 50%", &env), "echo 50%");
        assert_eq!(substitute_variables("echo 5% of %x%", &env), "echo 5% of 1");
        assert_eq!(substitute_variables("for %a in %x% 2", &env), "for %a in 1 2");
        assert_eq!(substitute_variables("echo ^%x^% %x%", &env), "echo ^%x^% 1");
    }

    #[test]
    fn test_substitution_is_referentially_transparent() {
        let env = env_with(&[("a", "1"), ("b", "two")]);
        let line = "run %a% %b% %c% ^%a";
        let first = substitute_variables(line, &env);
        let second = substitute_variables(line, &env);
        assert_eq!(first, second);
        assert_eq!(env.get("a"), Some("1"));
    }

    #[test]
    fn test_alias_applies_to_first_word_only_once() {
        let mut aliases = AliasTable::new();
        aliases.set("ll", "dir -b", false).unwrap();
        aliases.set("dir", "never", false).unwrap();
        let no_builtins = |_: &str| false;

        assert_eq!(substitute_alias("ll x", &aliases, no_builtins), "dir -b x");
        assert_eq!(substitute_alias("echo ll", &aliases, no_builtins), "echo ll");
        assert_eq!(substitute_alias("cat f", &aliases, no_builtins), "type f");
    }

    #[test]
    fn test_builtin_names_are_not_aliased() {
        let mut aliases = AliasTable::new();
        aliases.set("echo", "type", false).unwrap();
        let line = substitute_alias("echo hi", &aliases, |n| n.eq_ignore_ascii_case("echo"));
        assert_eq!(line, "echo hi");
    }

    #[test]
    fn test_positional_arguments() {
        let args = vec!["s.nsh".to_string(), "one".to_string()];
        assert_eq!(
            substitute_positional("echo %0 %1 %2 ^%1", &args),
            "echo s.nsh one \"\" ^%1"
        );
    }

    #[test]
    fn test_script_vars_respect_identifier_boundary() {
        let vars = vec![("a".to_string(), "X".to_string())];
        assert_eq!(
            substitute_script_vars("echo %a %abc %a.", &vars, None),
            "echo X %abc X."
        );
        assert_eq!(
            substitute_script_vars("for %a in %a", &vars, Some("a")),
            "for %a in %a"
        );
    }
}
