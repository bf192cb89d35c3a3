//! Declarative patch scripts: `[ENABLE]`/`[DISABLE]` sections of `aobscan`,
//! `aobscanmodule`, `patch`, and `restore` directives, resolved against a symbol
//! table built from module bases and (when parseable) their exported ELF symbols.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::inject::Injector;
use crate::scanner::pattern::{self, PatternByte};
use crate::target::TargetHandle;

/// One parsed directive.
#[derive(Debug, Clone)]
enum Command {
    AobScan { name: String, pattern: String },
    AobScanModule {
        name: String,
        module: String,
        pattern: String,
    },
    Patch { address_expr: String, bytes: String },
    Restore { address_expr: String },
}

/// A parsed script, ready to be enabled and disabled against an [`Injector`].
pub struct Script {
    enable: Vec<Command>,
    disable: Vec<Command>,
    symbols: HashMap<String, u64>,
}

fn is_comment_or_blank(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with(';') || trimmed.starts_with('#') || trimmed.starts_with("//")
}

fn section_header(line: &str) -> Option<&'static str> {
    let trimmed = line.trim();
    let lower = trimmed.to_ascii_lowercase();
    match lower.as_str() {
        "[enable]" => Some("enable"),
        "[disable]" => Some("disable"),
        _ => None,
    }
}

/// Splits raw script text into (enable lines, disable lines). A script with no
/// section headers at all is wrapped as a single implicit `[ENABLE]` block.
fn split_sections(text: &str) -> (Vec<String>, Vec<String>) {
    let mut enable = Vec::new();
    let mut disable = Vec::new();
    let mut current: Option<&str> = None;
    let mut saw_header = false;

    for line in text.lines() {
        if is_comment_or_blank(line) {
            continue;
        }
        if let Some(section) = section_header(line) {
            saw_header = true;
            current = Some(section);
            continue;
        }
        match current {
            Some("enable") => enable.push(line.to_string()),
            Some("disable") => disable.push(line.to_string()),
            Some(_) => unreachable!(),
            None => enable.push(line.to_string()),
        }
    }

    if !saw_header {
        // Every non-comment line belongs to the implicit enable block already.
        debug_assert!(disable.is_empty());
    }
    (enable, disable)
}

fn parse_parenthesized(line: &str, keyword: &str) -> Option<Vec<String>> {
    let rest = line.strip_prefix(keyword)?.trim_start();
    let rest = rest.strip_prefix('(')?;
    let inner = rest.strip_suffix(')')?;
    Some(inner.split(',').map(|s| s.trim().to_string()).collect())
}

fn parse_command(line: &str) -> std::result::Result<Command, String> {
    let line = line.trim();

    if let Some(parts) = parse_parenthesized(line, "aobscanmodule") {
        if parts.len() < 3 {
            return Err(format!("aobscanmodule expects NAME,MODULE,pattern: {line}"));
        }
        return Ok(Command::AobScanModule {
            name: parts[0].clone(),
            module: parts[1].clone(),
            pattern: parts[2..].join(" "),
        });
    }
    if let Some(parts) = parse_parenthesized(line, "aobscan") {
        if parts.len() < 2 {
            return Err(format!("aobscan expects NAME,pattern: {line}"));
        }
        return Ok(Command::AobScan {
            name: parts[0].clone(),
            pattern: parts[1..].join(" "),
        });
    }

    let mut tokens = line.split_whitespace();
    match tokens.next() {
        Some(kw) if kw.eq_ignore_ascii_case("aobscanmodule") => {
            let name = tokens.next().ok_or("aobscanmodule missing NAME")?.to_string();
            let module = tokens.next().ok_or("aobscanmodule missing MODULE")?.to_string();
            let pattern: Vec<&str> = tokens.collect();
            if pattern.is_empty() {
                return Err("aobscanmodule missing pattern".to_string());
            }
            Ok(Command::AobScanModule {
                name,
                module,
                pattern: pattern.join(" "),
            })
        }
        Some(kw) if kw.eq_ignore_ascii_case("aobscan") => {
            let name = tokens.next().ok_or("aobscan missing NAME")?.to_string();
            let pattern: Vec<&str> = tokens.collect();
            if pattern.is_empty() {
                return Err("aobscan missing pattern".to_string());
            }
            Ok(Command::AobScan {
                name,
                pattern: pattern.join(" "),
            })
        }
        Some(kw) if kw.eq_ignore_ascii_case("patch") => {
            let address_expr = tokens.next().ok_or("patch missing address")?.to_string();
            let bytes: Vec<&str> = tokens.collect();
            if bytes.is_empty() {
                return Err("patch missing bytes".to_string());
            }
            Ok(Command::Patch {
                address_expr,
                bytes: bytes.join(" "),
            })
        }
        Some(kw) if kw.eq_ignore_ascii_case("restore") => {
            let address_expr = tokens.next().ok_or("restore missing address")?.to_string();
            Ok(Command::Restore { address_expr })
        }
        Some(other) => Err(format!("unrecognized directive: {other}")),
        None => Err("empty directive".to_string()),
    }
}

/// Preloads a symbol table from every mapped region's basename (first-observed base
/// address wins) and, when the backing file parses as an object file, its exported
/// symbol names rebased onto that region's start address.
pub fn build_symbol_table(target: &TargetHandle) -> Result<HashMap<String, u64>> {
    let mut symbols = HashMap::new();
    for region in target.regions()? {
        let Some(path) = &region.path else { continue };
        if let Some(basename) = region.basename_lower() {
            symbols.entry(basename).or_insert(region.start);
        }
        for (name, addr) in crate::symbol::resolve_module_exports(path, region.start) {
            symbols.entry(name).or_insert(addr);
        }
    }
    Ok(symbols)
}

fn parse_address_expr(expr: &str, symbols: &HashMap<String, u64>) -> std::result::Result<u64, String> {
    let expr = expr.trim();
    if let Some(hex) = expr.strip_prefix("0x").or_else(|| expr.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).map_err(|e| e.to_string());
    }
    if let Ok(v) = expr.parse::<u64>() {
        return Ok(v);
    }

    let (sym, sign, offset_str) = if let Some(idx) = expr.rfind('+') {
        (&expr[..idx], 1i64, &expr[idx + 1..])
    } else if let Some(idx) = expr.rfind('-') {
        (&expr[..idx], -1i64, &expr[idx + 1..])
    } else {
        (expr, 0, "")
    };

    let base = *symbols
        .get(&sym.to_ascii_lowercase())
        .or_else(|| symbols.get(sym))
        .ok_or_else(|| format!("undefined symbol: {sym}"))?;

    if sign == 0 {
        return Ok(base);
    }
    let offset: i64 = if let Some(hex) = offset_str.strip_prefix("0x").or_else(|| offset_str.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).map_err(|e| e.to_string())?
    } else {
        offset_str.parse::<i64>().map_err(|e| e.to_string())?
    };
    Ok((base as i64 + sign * offset) as u64)
}

fn parse_hex_bytes(s: &str) -> std::result::Result<Vec<u8>, String> {
    s.split_whitespace()
        .map(|tok| u8::from_str_radix(tok, 16).map_err(|e| format!("bad byte {tok}: {e}")))
        .collect()
}

fn scan_module_for_pattern(
    target: &TargetHandle,
    module: Option<&str>,
    pattern: &[PatternByte],
) -> Result<Option<u64>> {
    const CHUNK: usize = 64 * 1024;
    let module_lower = module.map(|m| m.to_ascii_lowercase());
    let overlap = pattern.len().saturating_sub(1);

    for region in target.regions()? {
        if !region.readable {
            continue;
        }
        if let Some(wanted) = &module_lower {
            if wanted != "$process" && !wanted.is_empty() {
                let matches_module = region
                    .path
                    .as_deref()
                    .map(|p| p.to_ascii_lowercase() == *wanted)
                    .unwrap_or(false)
                    || region.basename_lower().as_deref() == Some(wanted.as_str());
                if !matches_module {
                    continue;
                }
            }
        }

        let mut cursor = region.start;
        let mut carry: Vec<u8> = Vec::new();
        while cursor < region.end {
            let want = ((region.end - cursor) as usize).min(CHUNK);
            let buf = match target.read(cursor, want) {
                Ok(b) => b,
                Err(_) => {
                    cursor += want as u64;
                    carry.clear();
                    continue;
                }
            };
            let mut window = carry.clone();
            window.extend_from_slice(&buf);
            let window_base = cursor - carry.len() as u64;
            if let Some(offset) = pattern::find_all(pattern, &window).into_iter().next() {
                return Ok(Some(window_base + offset as u64));
            }
            if overlap > 0 && buf.len() >= overlap {
                carry = buf[buf.len() - overlap..].to_vec();
            } else {
                carry.clear();
            }
            cursor += want as u64;
        }
    }
    Ok(None)
}

impl Script {
    /// Parses `text`. All parse errors across both the enable and disable sections
    /// are collected; any error fails the whole script (strict policy — see
    /// DESIGN.md for why this crate doesn't mirror the grounding tool's mixed
    /// strict/tolerant handling).
    pub fn parse(text: &str, target: &TargetHandle) -> Result<Script> {
        let (enable_lines, disable_lines) = split_sections(text);
        let mut errors = Vec::new();
        let mut enable = Vec::new();
        let mut disable = Vec::new();

        for line in &enable_lines {
            match parse_command(line) {
                Ok(cmd) => enable.push(cmd),
                Err(e) => errors.push(e),
            }
        }
        for line in &disable_lines {
            match parse_command(line) {
                Ok(cmd) => disable.push(cmd),
                Err(e) => errors.push(e),
            }
        }
        if !errors.is_empty() {
            return Err(Error::ScriptParse(errors));
        }

        let symbols = build_symbol_table(target)?;
        Ok(Script {
            enable,
            disable,
            symbols,
        })
    }

    fn run(&mut self, target: &TargetHandle, injector: &mut Injector, commands: Vec<Command>) -> Result<()> {
        for command in commands {
            match command {
                Command::AobScan { name, pattern } => {
                    let parsed = pattern::parse_aob_pattern(&pattern)?;
                    let found = scan_module_for_pattern(target, None, &parsed)?
                        .ok_or(Error::PatternNotFound { module: None })?;
                    log::info!("[script] aobscan {name} -> 0x{found:x}");
                    self.symbols.insert(name.to_ascii_lowercase(), found);
                }
                Command::AobScanModule { name, module, pattern } => {
                    let parsed = pattern::parse_aob_pattern(&pattern)?;
                    let found = scan_module_for_pattern(target, Some(&module), &parsed)?
                        .ok_or(Error::PatternNotFound { module: Some(module.clone()) })?;
                    log::info!("[script] aobscanmodule {name} in {module} -> 0x{found:x}");
                    self.symbols.insert(name.to_ascii_lowercase(), found);
                }
                Command::Patch { address_expr, bytes } => {
                    let address = parse_address_expr(&address_expr, &self.symbols)
                        .map_err(|e| Error::UndefinedSymbol(e))?;
                    let bytes = parse_hex_bytes(&bytes).map_err(|e| Error::ParseFailed {
                        what: "patch bytes",
                        detail: e,
                    })?;
                    injector.patch(address, &bytes)?;
                }
                Command::Restore { address_expr } => {
                    let address = parse_address_expr(&address_expr, &self.symbols)
                        .map_err(|e| Error::UndefinedSymbol(e))?;
                    injector.restore(address)?;
                }
            }
        }
        Ok(())
    }

    /// Runs the enable section's commands in order against `injector`.
    pub fn enable(&mut self, target: &TargetHandle, injector: &mut Injector) -> Result<()> {
        let commands = self.enable.clone();
        self.run(target, injector, commands)
    }

    /// Runs the disable section if non-empty; otherwise restores every patch
    /// command recorded by the enable section, in order.
    pub fn disable(&mut self, target: &TargetHandle, injector: &mut Injector) -> Result<()> {
        if !self.disable.is_empty() {
            let commands = self.disable.clone();
            return self.run(target, injector, commands);
        }
        let restores: Vec<Command> = self
            .enable
            .iter()
            .filter_map(|c| match c {
                Command::Patch { address_expr, .. } => Some(Command::Restore {
                    address_expr: address_expr.clone(),
                }),
                _ => None,
            })
            .collect();
        self.run(target, injector, restores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_implicit_enable_block() {
        let (enable, disable) = split_sections("patch 0x1000 90 90\n");
        assert_eq!(enable.len(), 1);
        assert!(disable.is_empty());
    }

    #[test]
    fn splits_explicit_sections() {
        let text = "[ENABLE]\npatch 0x1000 90\n[DISABLE]\nrestore 0x1000\n";
        let (enable, disable) = split_sections(text);
        assert_eq!(enable.len(), 1);
        assert_eq!(disable.len(), 1);
    }

    #[test]
    fn parses_parenthesized_aobscan() {
        let cmd = parse_command("aobscan(NAME, 90 90 ?? 90)").unwrap();
        match cmd {
            Command::AobScan { name, pattern } => {
                assert_eq!(name, "NAME");
                assert_eq!(pattern, "90 90 ?? 90");
            }
            _ => panic!("expected AobScan"),
        }
    }

    #[test]
    fn parses_whitespace_patch() {
        let cmd = parse_command("patch 0x1000 90 90 90").unwrap();
        match cmd {
            Command::Patch { address_expr, bytes } => {
                assert_eq!(address_expr, "0x1000");
                assert_eq!(bytes, "90 90 90");
            }
            _ => panic!("expected Patch"),
        }
    }

    #[test]
    fn rejects_unrecognized_directive() {
        assert!(parse_command("frobnicate 0x1000").is_err());
    }

    #[test]
    fn resolves_absolute_and_symbol_expressions() {
        let mut symbols = HashMap::new();
        symbols.insert("libfoo.so".to_string(), 0x7f0000);
        assert_eq!(parse_address_expr("0x1000", &symbols).unwrap(), 0x1000);
        assert_eq!(parse_address_expr("libfoo.so+0x10", &symbols).unwrap(), 0x7f0010);
        assert_eq!(parse_address_expr("libfoo.so-16", &symbols).unwrap(), 0x7effF0);
    }
}
