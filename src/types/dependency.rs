use super::version::compare_versions;
use crate::error::{Error, Result};

use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, take_while, take_while1},
    character::complete::{alphanumeric1, char, multispace0},
    combinator::{all_consuming, opt, recognize, value},
    multi::{many0, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};
use std::{cmp::Ordering, fmt};

/// Relational operator of a versioned dependency
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Relation {
    None,
    Less,
    LessEq,
    Eq,
    GreaterEq,
    Greater,
}

impl Relation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::None => "",
            Relation::Less => "<<",
            Relation::LessEq => "<=",
            Relation::Eq => "=",
            Relation::GreaterEq => ">=",
            Relation::Greater => ">>",
        }
    }

    fn accepts(&self, ord: Ordering) -> bool {
        match self {
            Relation::None => true,
            Relation::Less => ord == Ordering::Less,
            Relation::LessEq => ord != Ordering::Greater,
            Relation::Eq => ord == Ordering::Equal,
            Relation::GreaterEq => ord != Ordering::Less,
            Relation::Greater => ord == Ordering::Greater,
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relationship fields of a binary package
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DepKind {
    PreDepends,
    Depends,
    Recommends,
    Suggests,
    Enhances,
    Conflicts,
    Breaks,
    Replaces,
}

impl DepKind {
    pub const ALL: [DepKind; 8] = [
        DepKind::PreDepends,
        DepKind::Depends,
        DepKind::Recommends,
        DepKind::Suggests,
        DepKind::Enhances,
        DepKind::Conflicts,
        DepKind::Breaks,
        DepKind::Replaces,
    ];

    /// Name of the control field holding this relationship
    pub fn field_name(&self) -> &'static str {
        match self {
            DepKind::PreDepends => "Pre-Depends",
            DepKind::Depends => "Depends",
            DepKind::Recommends => "Recommends",
            DepKind::Suggests => "Suggests",
            DepKind::Enhances => "Enhances",
            DepKind::Conflicts => "Conflicts",
            DepKind::Breaks => "Breaks",
            DepKind::Replaces => "Replaces",
        }
    }

    /// Whether the relationship must hold for a package to be installable
    pub fn is_critical(&self) -> bool {
        matches!(self, DepKind::PreDepends | DepKind::Depends)
    }

    /// Whether the relationship excludes its targets rather than requiring them
    pub fn is_negative(&self) -> bool {
        matches!(self, DepKind::Conflicts | DepKind::Breaks)
    }
}

/// A single dependency clause
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BaseDependency {
    pub name: String,
    pub relation: Relation,
    /// Version depended on, empty when unversioned
    pub version: String,
    pub pre_depend: bool,
}

impl BaseDependency {
    /// Whether a package with version `ver` satisfies this clause
    pub fn satisfied_by(&self, ver: &str) -> bool {
        if self.relation == Relation::None {
            return true;
        }
        self.relation.accepts(compare_versions(ver, &self.version))
    }
}

impl fmt::Display for BaseDependency {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.name)?;
        if self.relation != Relation::None {
            write!(f, " ({} {})", self.relation, self.version)?;
        }
        Ok(())
    }
}

/// An OR-group of dependency clauses, satisfied if any alternative is
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dependency {
    pub or_dependencies: Vec<BaseDependency>,
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let alternatives: Vec<String> = self.or_dependencies.iter().map(|d| d.to_string()).collect();
        f.write_str(&alternatives.join(" | "))
    }
}

// parser combinators
fn package_name(s: &str) -> IResult<&str, &str> {
    recognize(pair(
        alphanumeric1,
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.'),
    ))(s)
}

fn arch_qualifier(s: &str) -> IResult<&str, &str> {
    preceded(
        char(':'),
        take_while1(|c: char| c.is_ascii_alphanumeric() || c == '-'),
    )(s)
}

fn relation(s: &str) -> IResult<&str, Relation> {
    alt((
        value(Relation::Less, tag("<<")),
        value(Relation::LessEq, tag("<=")),
        value(Relation::GreaterEq, tag(">=")),
        value(Relation::Greater, tag(">>")),
        value(Relation::Eq, tag("=")),
        // Obsolete forms, which dpkg reads as inclusive
        value(Relation::LessEq, tag("<")),
        value(Relation::GreaterEq, tag(">")),
    ))(s)
}

fn version_string(s: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !c.is_whitespace() && c != ')')(s)
}

fn version_constraint(s: &str) -> IResult<&str, (Relation, &str)> {
    delimited(
        pair(char('('), multispace0),
        tuple((terminated(relation, multispace0), terminated(version_string, multispace0))),
        char(')'),
    )(s)
}

fn arch_restriction(s: &str) -> IResult<&str, &str> {
    delimited(char('['), is_not("]"), char(']'))(s)
}

fn build_profile(s: &str) -> IResult<&str, &str> {
    delimited(char('<'), is_not(">"), char('>'))(s)
}

fn alternative(s: &str) -> IResult<&str, (&str, Option<(Relation, &str)>)> {
    let (s, _) = multispace0(s)?;
    let (s, name) = package_name(s)?;
    let (s, _) = opt(arch_qualifier)(s)?;
    let (s, _) = multispace0(s)?;
    let (s, constraint) = opt(terminated(version_constraint, multispace0))(s)?;
    let (s, _) = opt(terminated(arch_restriction, multispace0))(s)?;
    let (s, _) = many0(terminated(build_profile, multispace0))(s)?;
    Ok((s, (name, constraint)))
}

fn or_group(s: &str) -> IResult<&str, Vec<(&str, Option<(Relation, &str)>)>> {
    separated_list1(char('|'), alternative)(s)
}

fn relationship_field(s: &str) -> IResult<&str, Vec<Vec<(&str, Option<(Relation, &str)>)>>> {
    all_consuming(terminated(separated_list1(char(','), or_group), multispace0))(s)
}

/// Parse a relationship field such as `Depends` into its OR-groups
pub fn parse_dependencies(s: &str, pre_depend: bool) -> Result<Vec<Dependency>> {
    if s.trim().is_empty() {
        return Ok(Vec::new());
    }

    let (_, groups) =
        relationship_field(s).map_err(|_| Error::Parse(format!("malformed relationship field: {}", s)))?;

    let res = groups
        .into_iter()
        .map(|group| Dependency {
            or_dependencies: group
                .into_iter()
                .map(|(name, constraint)| {
                    let (relation, version) = constraint.unwrap_or((Relation::None, ""));
                    BaseDependency {
                        name: name.to_owned(),
                        relation,
                        version: version.to_owned(),
                        pre_depend,
                    }
                })
                .collect(),
        })
        .collect();

    Ok(res)
}
