use std::{collections::HashSet, fmt::Display};

use sqlparser::ast::{Ident, ObjectName};

use super::BoundExpr;
use crate::{
    arena::{Arena, ArenaIndex},
    catalog::{Column, Table},
    error::{Error, Result},
};

/// An identifier as written in the query.
///
/// Unquoted names match case-insensitively, quoted names match exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Name {
    pub value: String,
    pub quoted: bool,
}

impl Name {
    pub fn new(value: &str) -> Self {
        Self {
            value: value.to_owned(),
            quoted: false,
        }
    }

    pub fn from_ident(ident: &Ident) -> Self {
        Self {
            value: ident.value.clone(),
            quoted: ident.quote_style.is_some(),
        }
    }

    /// Builds a name from its SQL rendering, stripping one level of `"`, `` ` `` or `[]` quoting.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let quoted = [('"', '"'), ('`', '`'), ('[', ']')]
            .iter()
            .find(|(open, close)| raw.len() >= 2 && raw.starts_with(*open) && raw.ends_with(*close));
        match quoted {
            Some(_) => Self {
                value: raw[1..raw.len() - 1].to_owned(),
                quoted: true,
            },
            None => Self::new(raw),
        }
    }

    pub fn matches(&self, candidate: &str) -> bool {
        if self.quoted {
            self.value == candidate
        } else {
            self.value.eq_ignore_ascii_case(candidate)
        }
    }

    pub fn normalized(&self) -> String {
        if self.quoted {
            self.value.clone()
        } else {
            self.value.to_lowercase()
        }
    }

    pub fn same_as(&self, other: &Name) -> bool {
        self.normalized() == other.normalized()
    }
}

impl Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

pub(crate) fn object_name_parts(name: &ObjectName) -> Result<Vec<Name>> {
    name.0
        .iter()
        .map(|part| {
            part.as_ident().map(Name::from_ident).ok_or_else(|| {
                Error::semantic(format!("Unsupported object name: {}", name))
            })
        })
        .collect()
}

pub(crate) fn dotted(parts: &[Name]) -> String {
    parts
        .iter()
        .map(|part| part.value.as_str())
        .collect::<Vec<_>>()
        .join(".")
}

/// Picks the entry named `name`, preferring an exact match over a case-insensitive one.
pub(crate) fn find_named<'t, T>(
    items: &'t [T],
    name: &Name,
    item_name: impl Fn(&T) -> &str,
) -> Option<&'t T> {
    items
        .iter()
        .find(|item| item_name(item) == name.value)
        .or_else(|| items.iter().find(|item| name.matches(item_name(item))))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationKind {
    Table(Table),
    Cte,
    Derived,
    /// Columns merged by `JOIN ... USING` or `NATURAL JOIN`; not addressable by name.
    Using,
}

#[derive(Debug, Clone)]
pub enum ColumnOrigin {
    Catalog(Column),
    /// One expression per contribution path (e.g. per UNION branch).
    Derived(Vec<BoundExpr>),
}

#[derive(Debug, Clone)]
pub struct RelationColumn {
    pub name: String,
    pub origin: ColumnOrigin,
}

/// A table-like object visible in a scope: a catalog table, a CTE or a derived table.
#[derive(Debug, Clone)]
pub struct Relation {
    pub alias: Name,
    pub kind: RelationKind,
    pub columns: Vec<RelationColumn>,
}

impl Relation {
    pub fn catalog_table(&self) -> Option<&Table> {
        match &self.kind {
            RelationKind::Table(table) => Some(table),
            _ => None,
        }
    }

    fn addressable(&self) -> bool {
        !matches!(self.kind, RelationKind::Using)
    }

    /// Whether a (possibly multi-part) qualifier designates this relation.
    fn is_designated_by(&self, qualifier: &[Name]) -> bool {
        if !self.addressable() {
            return false;
        }
        match qualifier {
            [alias] => alias.same_as(&self.alias),
            _ => match &self.kind {
                RelationKind::Table(table) if self.alias.matches(&table.name) => {
                    let fqdn = &table.fqdn.0;
                    fqdn.len() >= qualifier.len()
                        && fqdn[fqdn.len() - qualifier.len()..]
                            .iter()
                            .zip(qualifier)
                            .all(|(part, name)| name.matches(part))
                }
                _ => false,
            },
        }
    }

    fn position_of(&self, name: &Name) -> Option<usize> {
        self.columns
            .iter()
            .position(|column| column.name == name.value)
            .or_else(|| self.columns.iter().position(|column| name.matches(&column.name)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub relation: ArenaIndex,
    pub position: usize,
}

/// Relations introduced by one FROM clause (or one UPDATE/MERGE target list), in order.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub(crate) relations: Vec<ArenaIndex>,
    /// Columns merged into a `Using` relation; only reachable through their qualifier.
    pub(crate) hidden: HashSet<ColumnRef>,
}

impl Scope {
    pub(crate) fn add(&mut self, arena: &Arena<Relation>, idx: ArenaIndex) -> Result<()> {
        let new_relation = &arena[idx];
        if new_relation.addressable()
            && self
                .relations
                .iter()
                .map(|&other| &arena[other])
                .any(|other| other.addressable() && other.alias.same_as(&new_relation.alias))
        {
            return Err(Error::semantic(format!(
                "Table name `{}` specified more than once.",
                new_relation.alias
            )));
        }
        self.relations.push(idx);
        Ok(())
    }

    pub(crate) fn find_relation(
        &self,
        arena: &Arena<Relation>,
        qualifier: &[Name],
    ) -> Option<ArenaIndex> {
        self.relations
            .iter()
            .copied()
            .find(|&idx| arena[idx].is_designated_by(qualifier))
    }

    /// Visible (not hidden) columns called `name` across the scope's relations.
    pub(crate) fn matching_columns(&self, arena: &Arena<Relation>, name: &Name) -> Vec<ColumnRef> {
        let mut matches = vec![];
        for &relation in &self.relations {
            for (position, column) in arena[relation].columns.iter().enumerate() {
                let column_ref = ColumnRef { relation, position };
                if name.matches(&column.name) && !self.hidden.contains(&column_ref) {
                    matches.push(column_ref);
                }
            }
        }
        matches
    }

    pub(crate) fn visible_columns(&self, arena: &Arena<Relation>) -> Vec<(String, ColumnRef)> {
        let mut columns = vec![];
        for &relation in &self.relations {
            for (position, column) in arena[relation].columns.iter().enumerate() {
                let column_ref = ColumnRef { relation, position };
                if !self.hidden.contains(&column_ref) {
                    columns.push((column.name.clone(), column_ref));
                }
            }
        }
        columns
    }
}

pub(crate) fn column_position(relation: &Relation, name: &Name) -> Option<usize> {
    relation.position_of(name)
}
