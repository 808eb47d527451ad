/// Block line formatter
///
/// Renders one 30-minute block as a single automation line:
/// `HH:MM (ID=<ProgramName>) "FILE1.MP3",vht,"FILE2.MP3",...`
/// Wildcard fallbacks stay bare (no quotes, no extension). The parser is the
/// exact inverse and feeds the incremental merge of an existing day file.
use serde::{Deserialize, Serialize};

pub const TOKEN_SEPARATOR: &str = ",vht,";

// ── Block time helpers ────────────────────────────────────────────────────────

/// Render minutes-of-day as `HH:MM`.
pub fn block_label(minutes: u32) -> String {
    let m = minutes % 1440;
    format!("{:02}:{:02}", m / 60, m % 60)
}

/// Parse `HH:MM` back into minutes-of-day.
pub fn parse_block_label(label: &str) -> Option<u32> {
    let (h, m) = label.split_once(':')?;
    let h: u32 = h.trim().parse().ok()?;
    let m: u32 = m.trim().parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }
    Some(h * 60 + m)
}

// ── Filename sanitizer ────────────────────────────────────────────────────────

/// Fold the accented characters the station catalogs actually produce.
fn fold_accent(c: char) -> Option<char> {
    let folded = match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' | 'Á' | 'À' | 'Â' | 'Ã' | 'Ä' => 'a',
        'é' | 'è' | 'ê' | 'ë' | 'É' | 'È' | 'Ê' | 'Ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' | 'Í' | 'Ì' | 'Î' | 'Ï' => 'i',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' | 'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' | 'Ú' | 'Ù' | 'Û' | 'Ü' => 'u',
        'ç' | 'Ç' => 'c',
        'ñ' | 'Ñ' => 'n',
        _ => return None,
    };
    Some(folded)
}

fn allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '.' | '_' | '(' | ')' | '[' | ']')
}

/// Sanitize a filename for the automation playout format.
///
/// `filter_chars` holds user-configured encoding artifacts stripped before
/// anything else. The mandatory civic block never passes through here.
pub fn sanitize_filename(name: &str, filter_chars: &str) -> String {
    let mut cleaned = String::with_capacity(name.len());
    for c in name.chars() {
        if filter_chars.contains(c) {
            continue;
        }
        let c = fold_accent(c).unwrap_or(c);
        if c == '&' {
            cleaned.push('e');
            continue;
        }
        if allowed(c) {
            cleaned.push(c);
        }
    }

    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut upper = collapsed.to_uppercase();
    while upper.ends_with(".MP3.MP3") {
        upper.truncate(upper.len() - 4);
    }
    upper
}

/// Quote a sanitized filename for the line format.
pub fn quote_token(filename: &str) -> String {
    format!("\"{filename}\"")
}

// ── Fixed-content insertion ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertPosition {
    Start,
    Middle,
    End,
    /// 1-based slot index; clamped to the token list bounds.
    Index(u32),
}

/// Insert a fixed-content token into an already-selected token list.
pub fn insert_fixed_token(tokens: &mut Vec<String>, token: String, position: InsertPosition) {
    let at = match position {
        InsertPosition::Start => 0,
        InsertPosition::Middle => tokens.len() / 2,
        InsertPosition::End => tokens.len(),
        InsertPosition::Index(i) => (i.max(1) as usize - 1).min(tokens.len()),
    };
    tokens.insert(at, token);
}

// ── Line model ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLine {
    pub minutes: u32,
    pub program: String,
    /// Final tokens: quoted filenames or bare wildcard codes.
    pub tokens: Vec<String>,
}

impl BlockLine {
    pub fn render(&self) -> String {
        format!(
            "{} (ID={}) {}",
            block_label(self.minutes),
            self.program,
            self.tokens.join(TOKEN_SEPARATOR)
        )
    }

    pub fn parse(line: &str) -> Option<BlockLine> {
        let line = line.trim();
        let (label, rest) = line.split_once(' ')?;
        let minutes = parse_block_label(label)?;
        let rest = rest.trim_start();
        let rest = rest.strip_prefix("(ID=")?;
        let close = rest.find(')')?;
        let program = rest[..close].to_string();
        let tokens_part = rest[close + 1..].trim_start();
        let tokens = if tokens_part.is_empty() {
            Vec::new()
        } else {
            tokens_part
                .split(TOKEN_SEPARATOR)
                .map(|t| t.to_string())
                .collect()
        };
        Some(BlockLine {
            minutes,
            program,
            tokens,
        })
    }
}

/// Strip the surrounding quotes off a rendered token, if present.
pub fn unquote_token(token: &str) -> &str {
    token
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(token)
}

// ── Day-file merge ────────────────────────────────────────────────────────────

/// Merge freshly built block lines into an existing day file.
///
/// The file is parsed as a time→line map keyed by the leading `HH:MM`, new
/// lines overwrite their slot, and the result is re-serialized sorted by
/// time. Lines that don't parse are dropped rather than corrupting the grade.
pub fn merge_day_content(existing: &str, new_lines: &[String]) -> String {
    use std::collections::BTreeMap;

    let mut by_time: BTreeMap<String, String> = BTreeMap::new();
    for line in existing.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(label) = trimmed.get(..5).filter(|l| parse_block_label(l).is_some()) {
            by_time.insert(label.to_string(), trimmed.to_string());
        }
    }
    for line in new_lines {
        let trimmed = line.trim();
        if let Some(label) = trimmed.get(..5).filter(|l| parse_block_label(l).is_some()) {
            by_time.insert(label.to_string(), trimmed.to_string());
        }
    }

    let mut out = String::new();
    for line in by_time.values() {
        out.push_str(line);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizer_uppercases_and_restricts_charset() {
        assert_eq!(
            sanitize_filename("João & Maria - Coração.mp3", ""),
            "JOAO E MARIA - CORACAO.MP3"
        );
    }

    #[test]
    fn sanitizer_collapses_double_extension() {
        assert_eq!(
            sanitize_filename("Artist - Song.mp3.mp3", ""),
            "ARTIST - SONG.MP3"
        );
    }

    #[test]
    fn sanitizer_strips_filter_chars_first() {
        assert_eq!(sanitize_filename("S�ng � Title.mp3", "�"), "SNG TITLE.MP3");
    }

    #[test]
    fn sanitizer_collapses_whitespace() {
        assert_eq!(sanitize_filename("A   B\t C.mp3", ""), "A B C.MP3");
    }

    #[test]
    fn render_matches_expected_shape() {
        let line = BlockLine {
            minutes: 8 * 60,
            program: "Programação Musical".to_string(),
            tokens: vec![
                quote_token("ARTIST X - SONG A.MP3"),
                "coringa".to_string(),
                quote_token("ARTIST Y - SONG B.MP3"),
            ],
        };
        assert_eq!(
            line.render(),
            "08:00 (ID=Programação Musical) \"ARTIST X - SONG A.MP3\",vht,coringa,vht,\"ARTIST Y - SONG B.MP3\""
        );
    }

    #[test]
    fn parse_roundtrips_render() {
        let line = BlockLine {
            minutes: 23 * 60 + 30,
            program: "Madrugada Total".to_string(),
            tokens: vec![quote_token("A.MP3"), "coringa".to_string()],
        };
        let parsed = BlockLine::parse(&line.render()).unwrap();
        assert_eq!(parsed, line);
    }

    #[test]
    fn parse_tokens_strip_back_to_inputs() {
        let rendered = "10:30 (ID=Bloco) \"ONE.MP3\",vht,coringa,vht,\"TWO.MP3\"";
        let parsed = BlockLine::parse(rendered).unwrap();
        let stripped: Vec<&str> = parsed.tokens.iter().map(|t| unquote_token(t)).collect();
        assert_eq!(stripped, vec!["ONE.MP3", "coringa", "TWO.MP3"]);
    }

    #[test]
    fn insert_positions() {
        let base = || {
            vec![
                "a".to_string(),
                "b".to_string(),
                "c".to_string(),
                "d".to_string(),
            ]
        };

        let mut t = base();
        insert_fixed_token(&mut t, "x".into(), InsertPosition::Start);
        assert_eq!(t[0], "x");

        let mut t = base();
        insert_fixed_token(&mut t, "x".into(), InsertPosition::End);
        assert_eq!(t[4], "x");

        let mut t = base();
        insert_fixed_token(&mut t, "x".into(), InsertPosition::Middle);
        assert_eq!(t[2], "x");

        let mut t = base();
        insert_fixed_token(&mut t, "x".into(), InsertPosition::Index(2));
        assert_eq!(t[1], "x");

        let mut t = base();
        insert_fixed_token(&mut t, "x".into(), InsertPosition::Index(99));
        assert_eq!(t[4], "x");
    }

    #[test]
    fn merge_is_idempotent() {
        let a = "08:00 (ID=X) \"A.MP3\"\n09:00 (ID=X) \"B.MP3\"\n";
        let b = vec!["08:30 (ID=Y) \"C.MP3\"".to_string()];
        let once = merge_day_content(a, &b);
        let twice = merge_day_content(&once, &b);
        assert_eq!(once, twice);
        assert_eq!(
            once,
            "08:00 (ID=X) \"A.MP3\"\n08:30 (ID=Y) \"C.MP3\"\n09:00 (ID=X) \"B.MP3\"\n"
        );
    }

    #[test]
    fn merge_overwrites_same_slot() {
        let a = "08:00 (ID=X) \"OLD.MP3\"\n";
        let merged = merge_day_content(a, &["08:00 (ID=X) \"NEW.MP3\"".to_string()]);
        assert_eq!(merged, "08:00 (ID=X) \"NEW.MP3\"\n");
    }
}
