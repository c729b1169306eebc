use crate::error::{Error, Result};

use nom::{
    bytes::complete::take_while1, character::complete::char, sequence::terminated, IResult,
};
use std::{fmt, str::FromStr};

/// Read-only view of one control file stanza.
///
/// Field names are matched case-insensitively. Values follow the usual deb822
/// rules: the text after the colon on the first line, with continuation lines
/// kept as-is (leading space included) and joined by newlines. `Display`
/// gives back the original text untouched.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Record {
    text: String,
    fields: Vec<(String, String)>,
}

fn field_name(line: &str) -> IResult<&str, &str> {
    terminated(
        take_while1(|c: char| c != ':' && !c.is_whitespace()),
        char(':'),
    )(line)
}

fn is_continuation(line: &str) -> bool {
    line.starts_with(' ') || line.starts_with('\t')
}

impl Record {
    /// Parse a single stanza. Blank lines are only allowed at the very end.
    pub fn parse(text: &str) -> Result<Self> {
        let mut fields: Vec<(String, String)> = Vec::new();
        let mut trailing_blank = false;

        for line in text.lines() {
            if line.trim().is_empty() {
                trailing_blank = true;
                continue;
            }
            if trailing_blank {
                return Err(Error::Parse("more than one stanza in record".to_owned()));
            }
            if line.starts_with('#') {
                continue;
            }
            if is_continuation(line) {
                match fields.last_mut() {
                    Some((_, value)) => {
                        value.push('\n');
                        value.push_str(line);
                    }
                    None => {
                        return Err(Error::Parse(format!(
                            "continuation line before any field: {:?}",
                            line
                        )))
                    }
                }
                continue;
            }
            let (rest, name) = field_name(line)
                .map_err(|_| Error::Parse(format!("malformed field: {:?}", line)))?;
            fields.push((name.to_owned(), rest.trim_start().to_owned()));
        }

        for (_, value) in fields.iter_mut() {
            let trimmed = value.trim_end().len();
            value.truncate(trimmed);
        }

        Ok(Record {
            text: text.to_owned(),
            fields,
        })
    }

    /// Split a control file into its stanzas
    pub fn parse_stanzas(text: &str) -> Result<Vec<Self>> {
        let mut res = Vec::new();
        let mut start: Option<usize> = None;
        let mut pos = 0;

        for line in text.split_inclusive('\n') {
            if line.trim().is_empty() {
                if let Some(s) = start.take() {
                    res.push(Record::parse(&text[s..pos])?);
                }
            } else if start.is_none() {
                start = Some(pos);
            }
            pos += line.len();
        }
        if let Some(s) = start {
            res.push(Record::parse(&text[s..])?);
        }

        Ok(res)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.as_str())
    }

    /// Return the value of `key`, or `default` when the field is absent
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Field names in stanza order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The stanza exactly as it was parsed
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl FromStr for Record {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Record::parse(s)
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const STANZA: &str = "Package: hello\n\
Version: 2.10-2\n\
Installed-Size: 280\n\
Depends: libc6 (>= 2.34)\n\
Description: example package based on GNU hello\n \
The GNU hello program produces a familiar, friendly greeting.\n \
.\n  \
verbatim\n\
Homepage:   https://www.gnu.org/software/hello/  \n";

    #[test]
    fn lookup() {
        let rec = Record::parse(STANZA).unwrap();
        assert_eq!(rec.len(), 6);
        assert_eq!(rec.get("Package"), Some("hello"));
        assert_eq!(rec.get("package"), Some("hello"));
        assert!(rec.contains_key("INSTALLED-SIZE"));
        assert!(!rec.contains_key("Pre-Depends"));
        assert_eq!(rec.get_or("Pre-Depends", "none"), "none");
        assert_eq!(rec.get("Homepage"), Some("https://www.gnu.org/software/hello/"));
        assert_eq!(
            rec.get("Description"),
            Some(
                "example package based on GNU hello\n The GNU hello program produces a familiar, friendly greeting.\n .\n  verbatim"
            )
        );
        assert_eq!(
            rec.keys().collect::<Vec<_>>(),
            vec!["Package", "Version", "Installed-Size", "Depends", "Description", "Homepage"]
        );
    }

    #[test]
    fn round_trip() {
        let sources = vec![
            STANZA,
            "Package: a\nVersion: 1\n",
            "Package: a\r\nVersion: 1",
            "Package: a\n# comment\nVersion:1\n\n",
        ];
        for s in sources {
            let rec: Record = s.parse().unwrap();
            assert_eq!(rec.to_string(), s);
            assert_eq!(rec.as_str().as_bytes(), s.as_bytes());
        }
    }

    #[test]
    fn stanzas() {
        let text = format!("\n{}\nPackage: b\nVersion: 1\n\n\nPackage: c\nVersion: 2", STANZA);
        let recs = Record::parse_stanzas(&text).unwrap();
        assert_eq!(recs.len(), 3);
        assert_eq!(recs[0].to_string(), STANZA);
        assert_eq!(recs[1].to_string(), "Package: b\nVersion: 1\n");
        assert_eq!(recs[2].get("Version"), Some("2"));
    }

    #[test]
    fn malformed() {
        assert!(Record::parse(" leading continuation\n").is_err());
        assert!(Record::parse("no colon here\n").is_err());
        assert!(Record::parse("Package: a\n\nPackage: b\n").is_err());
    }
}
