use std::{collections::HashSet, ops::ControlFlow};

use sqlparser::ast::{Expr, Query, Visit, Visitor};

use super::{Binder, BoundExpr, BoundQuery, scope::Name};
use crate::{catalog::CatalogReader, error::Error};

/// Collects the column operands of an expression.
///
/// Subqueries directly nested in the expression are bound on the spot and become operands
/// themselves; anything deeper belongs to those subqueries.
struct ExprBinder<'b, 'a, R: CatalogReader + ?Sized> {
    binder: &'b mut Binder<'a, R>,
    /// Output names an unqualified reference may designate instead of a column (ORDER BY).
    aliases: &'b [String],
    query_depth: usize,
    in_exists: bool,
    /// Subqueries used as a single value, which must return exactly one column.
    scalar: HashSet<*const Query>,
    /// Subqueries compared with a row constructor, like `(a, b) = (SELECT x, y ...)`.
    rows: HashSet<*const Query>,
    operands: Vec<BoundExpr>,
}

fn row_comparison(left: &Expr, right: &Expr) -> Option<*const Query> {
    match (left, right) {
        (Expr::Tuple(_), Expr::Subquery(query)) | (Expr::Subquery(query), Expr::Tuple(_)) => {
            Some(std::ptr::from_ref(query.as_ref()))
        }
        _ => None,
    }
}

fn single_column(bound: &BoundQuery) -> crate::Result<()> {
    if bound.width() != 1 {
        return Err(Error::semantic(format!(
            "Subquery must return only one column, it returns {}.",
            bound.width()
        )));
    }
    Ok(())
}

impl<R: CatalogReader + ?Sized> Visitor for ExprBinder<'_, '_, R> {
    type Break = Error;

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if self.query_depth == 0 {
            let exists = std::mem::take(&mut self.in_exists);
            let scalar = self.scalar.contains(&std::ptr::from_ref(query));
            let bound = self.binder.bind_query(query).and_then(|bound| {
                if scalar {
                    single_column(&bound)?;
                }
                Ok(bound)
            });
            match bound {
                Ok(bound) if exists => self.operands.push(BoundExpr::Exists(Box::new(bound))),
                Ok(bound) => self.operands.push(BoundExpr::Subquery {
                    query: Box::new(bound),
                    position: None,
                }),
                Err(err) => return ControlFlow::Break(err),
            }
        }
        self.query_depth += 1;
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, _query: &Query) -> ControlFlow<Self::Break> {
        self.query_depth -= 1;
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        if self.query_depth > 0 {
            return ControlFlow::Continue(());
        }
        let parts = match expr {
            Expr::Identifier(ident) => {
                let name = Name::from_ident(ident);
                if self.aliases.iter().any(|alias| name.matches(alias)) {
                    return ControlFlow::Continue(());
                }
                vec![name]
            }
            Expr::CompoundIdentifier(idents) => idents.iter().map(Name::from_ident).collect(),
            Expr::Exists { .. } => {
                self.in_exists = true;
                return ControlFlow::Continue(());
            }
            Expr::Subquery(query) => {
                let query = std::ptr::from_ref(query.as_ref());
                if !self.rows.contains(&query) {
                    self.scalar.insert(query);
                }
                return ControlFlow::Continue(());
            }
            Expr::InSubquery { expr, subquery, .. } => {
                if !matches!(expr.as_ref(), Expr::Tuple(_)) {
                    self.scalar.insert(std::ptr::from_ref(subquery.as_ref()));
                }
                return ControlFlow::Continue(());
            }
            Expr::BinaryOp { left, right, .. }
            | Expr::AnyOp { left, right, .. }
            | Expr::AllOp { left, right, .. } => {
                self.rows.extend(row_comparison(left, right));
                return ControlFlow::Continue(());
            }
            _ => return ControlFlow::Continue(()),
        };
        match self.binder.resolve_column(&parts) {
            Ok(column_ref) => {
                self.operands.push(BoundExpr::Column(column_ref));
                ControlFlow::Continue(())
            }
            Err(err) => ControlFlow::Break(err),
        }
    }
}

impl<R: CatalogReader + ?Sized> Binder<'_, R> {
    /// Binds a value-producing expression against the current scope stack.
    pub(crate) fn bind_expr(&mut self, expr: &Expr) -> crate::Result<BoundExpr> {
        match expr {
            Expr::Nested(inner) => return self.bind_expr(inner),
            Expr::Subquery(query) => {
                let query = self.bind_query(query)?;
                single_column(&query)?;
                return Ok(BoundExpr::Subquery {
                    query: Box::new(query),
                    position: None,
                });
            }
            _ => {}
        }

        let mut operands = self.collect_operands(expr, &[])?;
        let bound = match (expr, operands.len()) {
            (_, 0) => BoundExpr::Literal,
            (Expr::Identifier(_) | Expr::CompoundIdentifier(_), 1) => operands.remove(0),
            _ => BoundExpr::Composite(operands),
        };
        Ok(bound)
    }

    /// Binds every expression in a clause for validation only (WHERE, ON, GROUP BY, ...).
    pub(crate) fn bind_clause<V: Visit>(&mut self, clause: &V, aliases: &[String]) -> crate::Result<()> {
        self.collect_operands(clause, aliases).map(|_| ())
    }

    fn collect_operands<V: Visit>(
        &mut self,
        node: &V,
        aliases: &[String],
    ) -> crate::Result<Vec<BoundExpr>> {
        let mut visitor = ExprBinder {
            binder: self,
            aliases,
            query_depth: 0,
            in_exists: false,
            scalar: HashSet::new(),
            rows: HashSet::new(),
            operands: vec![],
        };
        if let ControlFlow::Break(err) = node.visit(&mut visitor) {
            return Err(err);
        }
        Ok(visitor.operands)
    }
}
