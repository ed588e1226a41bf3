use std::io::BufRead;

use crate::error::{ErrorKind, ParseError};

/// The tokens of one non-empty source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TokenLine {
    pub(crate) line_number: usize,
    pub(crate) tokens: Vec<String>,
}

impl TokenLine {
    /// Splits a leading marker character off the first token, e.g. `@fetch`.
    pub(crate) fn marker(&self, marker: char) -> Option<&str> {
        self.tokens.first().and_then(|t| t.strip_prefix(marker))
    }
}

/// Strips `#` comments, treats commas as whitespace and drops blank lines.
pub(crate) fn token_lines<R: BufRead>(reader: R) -> Result<Vec<TokenLine>, ParseError> {
    let mut out = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line_number = index + 1;
        let line = line.map_err(|e| {
            ParseError::new(
                line_number,
                ErrorKind::Syntax(format!("Failed to read line: {}", e)),
            )
        })?;
        let line = line.split('#').next().unwrap_or_default();
        let tokens: Vec<String> = line
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        if tokens.is_empty() {
            continue;
        }
        out.push(TokenLine {
            line_number,
            tokens,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn lex(input: &str) -> Vec<TokenLine> {
        token_lines(Cursor::new(input)).expect("Lexing failed")
    }

    #[test]
    fn test_comments_commas_and_blank_lines() {
        let lines = lex("# header\n\n  @control-word A, B,C  # trailing\n\t\nLDA 0x1F\n");
        assert_eq!(
            lines,
            vec![
                TokenLine {
                    line_number: 3,
                    tokens: vec!["@control-word".into(), "A".into(), "B".into(), "C".into()],
                },
                TokenLine {
                    line_number: 5,
                    tokens: vec!["LDA".into(), "0x1F".into()],
                },
            ]
        );
    }

    #[test]
    fn test_marker() {
        let lines = lex("@fetch\n.text\nNOP");
        assert_eq!(lines[0].marker('@'), Some("fetch"));
        assert_eq!(lines[1].marker('.'), Some("text"));
        assert_eq!(lines[2].marker('@'), None);
    }

    #[test]
    fn test_error_invalid_utf8() {
        let err = token_lines(Cursor::new(b"ok\n\xff\xfe\n".to_vec())).unwrap_err();
        assert!(err
            .to_string()
            .starts_with("Error on line 2: Failed to read line:"));
    }
}
