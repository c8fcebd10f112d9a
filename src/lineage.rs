use std::collections::HashSet;

use indexmap::IndexMap;
use serde::Serialize;

use crate::{
    arena::Arena,
    binder::{BoundBody, BoundExpr, BoundQuery, BoundStatement, ColumnOrigin, ColumnRef, Relation},
    catalog::{Column, ColumnId},
    error::{Error, Result},
};

/// `source` contributes to the value written into `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineageEdge {
    pub source: Column,
    pub target: Column,
}

/// Derives column-level lineage edges from a bound statement.
///
/// Each written column gets one edge per distinct catalog column its expression reads. The
/// deduplication is per contribution path: a column feeding the same target through two UNION
/// branches yields two edges.
pub fn extract_lineage(bound: &BoundStatement) -> Result<Vec<LineageEdge>> {
    let tracer = Tracer {
        relations: &bound.relations,
    };
    let mut edges = vec![];
    match &bound.body {
        BoundBody::Query(_) => {
            return Err(Error::semantic(
                "A SELECT statement writes no table, so it has no column lineage.",
            ));
        }
        BoundBody::Insert {
            target,
            columns,
            source,
        }
        | BoundBody::CreateTableAs {
            target,
            columns,
            source,
        }
        | BoundBody::CreateView {
            target,
            columns,
            source,
        } => {
            if columns.len() != source.width() {
                return Err(Error::semantic(format!(
                    "{} columns of `{}` are written from {} expressions.",
                    columns.len(),
                    target.name,
                    source.width()
                )));
            }
            for (position, target_column) in columns.iter().enumerate() {
                for branch in &source.branches {
                    for source_column in tracer.contributors(&branch[position].expr) {
                        edges.push(LineageEdge {
                            source: source_column,
                            target: target_column.clone(),
                        });
                    }
                }
            }
        }
        BoundBody::Update { assignments, .. } | BoundBody::Merge { assignments, .. } => {
            for assignment in assignments {
                for source_column in tracer.contributors(&assignment.expr) {
                    edges.push(LineageEdge {
                        source: source_column,
                        target: assignment.column.clone(),
                    });
                }
            }
        }
    }
    log::debug!("Extracted {} lineage edges.", edges.len());
    Ok(edges)
}

/// One UNION branch taken while tracing: the branch of a derived column or of a subquery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Branch {
    Column(ColumnRef, usize),
    Subquery(*const BoundQuery, usize),
}

/// Catalog columns found so far, deduplicated per trail of branches taken to reach them.
type Contributions = IndexMap<(Vec<Branch>, ColumnId), Column>;

struct Tracer<'a> {
    relations: &'a Arena<Relation>,
}

impl Tracer<'_> {
    /// Catalog columns read by `expr`, in first-seen order.
    ///
    /// A column is listed once per contribution path: reaching it through two branches of a
    /// UNION (in a CTE, a derived table or a subquery) lists it twice.
    fn contributors(&self, expr: &BoundExpr) -> Vec<Column> {
        let mut found = IndexMap::new();
        let mut visiting = HashSet::new();
        self.collect(expr, &mut vec![], &mut found, &mut visiting);
        found.into_values().collect()
    }

    fn collect(
        &self,
        expr: &BoundExpr,
        trail: &mut Vec<Branch>,
        found: &mut Contributions,
        visiting: &mut HashSet<ColumnRef>,
    ) {
        match expr {
            BoundExpr::Column(column_ref) => {
                // Recursive CTEs reference their own columns.
                if !visiting.insert(*column_ref) {
                    return;
                }
                let column = &self.relations[column_ref.relation].columns[column_ref.position];
                match &column.origin {
                    ColumnOrigin::Catalog(column) => {
                        found
                            .entry((trail.clone(), column.id))
                            .or_insert_with(|| column.clone());
                    }
                    ColumnOrigin::Derived(exprs) if exprs.len() == 1 => {
                        self.collect(&exprs[0], trail, found, visiting);
                    }
                    ColumnOrigin::Derived(exprs) => {
                        for (branch, expr) in exprs.iter().enumerate() {
                            trail.push(Branch::Column(*column_ref, branch));
                            self.collect(expr, trail, found, visiting);
                            trail.pop();
                        }
                    }
                }
                visiting.remove(column_ref);
            }
            BoundExpr::Literal | BoundExpr::Exists(_) => {}
            BoundExpr::Composite(operands) => {
                for operand in operands {
                    self.collect(operand, trail, found, visiting);
                }
            }
            BoundExpr::Subquery { query, position } => {
                self.collect_query(query, *position, trail, found, visiting)
            }
        }
    }

    fn collect_query(
        &self,
        query: &BoundQuery,
        position: Option<usize>,
        trail: &mut Vec<Branch>,
        found: &mut Contributions,
        visiting: &mut HashSet<ColumnRef>,
    ) {
        let split = query.branches.len() > 1;
        for (index, branch) in query.branches.iter().enumerate() {
            if split {
                trail.push(Branch::Subquery(std::ptr::from_ref(query), index));
            }
            match position {
                Some(position) => {
                    if let Some(projection) = branch.get(position) {
                        self.collect(&projection.expr, trail, found, visiting);
                    }
                }
                None => {
                    for projection in branch {
                        self.collect(&projection.expr, trail, found, visiting);
                    }
                }
            }
            if split {
                trail.pop();
            }
        }
    }
}
