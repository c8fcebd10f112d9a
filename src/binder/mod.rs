//! Name resolution of parsed statements against the catalog.
//!
//! Binding walks a statement once, maintaining a stack of [`Scope`]s (one per nested FROM
//! clause) and a stack of CTE frames. Every table-like object it meets is allocated as a
//! [`Relation`] in an arena; column references become [`ColumnRef`]s into that arena, so the
//! lineage extractor can later follow derived columns down to catalog columns.

mod expr;
mod scope;

pub use scope::{ColumnOrigin, ColumnRef, Name, Relation, RelationColumn, RelationKind, Scope};

use indexmap::IndexMap;
use sqlparser::ast::{
    Assignment, AssignmentTarget, Cte, Expr, JoinConstraint, JoinOperator, MergeAction,
    MergeInsertKind, ObjectName, OrderBy, Query, Select, SelectItem, SelectItemQualifiedWildcardKind,
    SetExpr, Statement, TableAliasColumnDef, TableFactor, TableObject, TableWithJoins,
    UpdateTableFromKind, Values, WildcardAdditionalOptions,
};

use crate::{
    arena::{Arena, ArenaIndex},
    catalog::{CatalogReader, Column, Schema, Source, Table, TableId},
    error::{Error, Result},
};
use scope::{column_position, dotted, find_named, object_name_parts};

#[derive(Debug, Clone)]
pub enum BoundExpr {
    Column(ColumnRef),
    /// Constants, parameters and anything else without column operands.
    Literal,
    Composite(Vec<BoundExpr>),
    /// A scalar, IN or row subquery. `position` selects one output column for row
    /// assignments like `SET (a, b) = (SELECT ...)`.
    Subquery {
        query: Box<BoundQuery>,
        position: Option<usize>,
    },
    /// Contributes only a boolean, never column values.
    Exists(Box<BoundQuery>),
}

#[derive(Debug, Clone)]
pub struct BoundProjection {
    pub name: String,
    pub expr: BoundExpr,
}

/// Output of a query: one projection list per set-operation branch, all of the same width.
#[derive(Debug, Clone)]
pub struct BoundQuery {
    pub branches: Vec<Vec<BoundProjection>>,
}

impl BoundQuery {
    pub fn width(&self) -> usize {
        self.branches.first().map_or(0, Vec::len)
    }

    /// Output column names, taken from the first branch.
    pub fn column_names(&self) -> Vec<String> {
        self.branches
            .first()
            .map(|branch| branch.iter().map(|p| p.name.clone()).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct BoundAssignment {
    pub column: Column,
    pub expr: BoundExpr,
}

#[derive(Debug, Clone)]
pub enum BoundBody {
    Query(BoundQuery),
    /// `columns[i]` receives output column `i` of `source`.
    Insert {
        target: Table,
        columns: Vec<Column>,
        source: BoundQuery,
    },
    CreateTableAs {
        target: Table,
        columns: Vec<Column>,
        source: BoundQuery,
    },
    CreateView {
        target: Table,
        columns: Vec<Column>,
        source: BoundQuery,
    },
    Update {
        target: Table,
        assignments: Vec<BoundAssignment>,
    },
    /// Assignments of every WHEN MATCHED UPDATE and WHEN NOT MATCHED INSERT action, in order.
    Merge {
        target: Table,
        assignments: Vec<BoundAssignment>,
    },
}

/// A fully resolved statement; owns the relations its [`ColumnRef`]s point into.
#[derive(Debug, Clone)]
pub struct BoundStatement {
    pub body: BoundBody,
    pub relations: Arena<Relation>,
    /// Catalog tables the statement reads, in order of first reference.
    pub tables: Vec<Table>,
}

impl BoundStatement {
    pub fn column(&self, column_ref: ColumnRef) -> &RelationColumn {
        &self.relations[column_ref.relation].columns[column_ref.position]
    }

    /// The catalog column a reference designates, if it points straight at a catalog table.
    pub fn catalog_column(&self, column_ref: ColumnRef) -> Option<&Column> {
        match &self.column(column_ref).origin {
            ColumnOrigin::Catalog(column) => Some(column),
            ColumnOrigin::Derived(_) => None,
        }
    }

    /// Names of the columns the statement produces or writes.
    pub fn output_columns(&self) -> Vec<String> {
        match &self.body {
            BoundBody::Query(query) => query.column_names(),
            BoundBody::Insert { source, .. }
            | BoundBody::CreateTableAs { source, .. }
            | BoundBody::CreateView { source, .. } => source.column_names(),
            BoundBody::Update { assignments, .. } | BoundBody::Merge { assignments, .. } => {
                assignments.iter().map(|a| a.column.name.clone()).collect()
            }
        }
    }
}

/// Resolves every name in `statement` against the tables of `source`.
pub fn bind_statement<R: CatalogReader + ?Sized>(
    reader: &R,
    source: &Source,
    statement: &Statement,
) -> Result<BoundStatement> {
    let mut binder = Binder::new(reader, source);
    let body = binder.bind_body(statement)?;
    log::debug!(
        "Bound statement with {} relations and {} catalog tables.",
        binder.relations.len(),
        binder.tables.len()
    );
    Ok(BoundStatement {
        body,
        relations: binder.relations,
        tables: binder.tables.into_values().collect(),
    })
}

/// Catalog tables read by a statement and the names of the columns it produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySummary {
    pub tables: Vec<Table>,
    pub columns: Vec<String>,
}

pub fn bind_query_summary<R: CatalogReader + ?Sized>(
    reader: &R,
    source: &Source,
    statement: &Statement,
) -> Result<QuerySummary> {
    let bound = bind_statement(reader, source, statement)?;
    Ok(QuerySummary {
        columns: bound.output_columns(),
        tables: bound.tables,
    })
}

pub struct Binder<'a, R: CatalogReader + ?Sized> {
    reader: &'a R,
    source: &'a Source,
    relations: Arena<Relation>,
    scopes: Vec<Scope>,
    /// One frame of visible CTEs per query being bound.
    ctes: Vec<Vec<ArenaIndex>>,
    tables: IndexMap<TableId, Table>,
}

impl<'a, R: CatalogReader + ?Sized> Binder<'a, R> {
    pub fn new(reader: &'a R, source: &'a Source) -> Self {
        Self {
            reader,
            source,
            relations: Arena::default(),
            scopes: vec![],
            ctes: vec![],
            tables: IndexMap::new(),
        }
    }

    /// Runs `f` with `scope` pushed as the innermost scope.
    pub fn with_scope<T>(
        &mut self,
        scope: Scope,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        self.scopes.push(scope);
        let result = f(self);
        self.scopes.pop();
        result
    }

    /// Finds the catalog table a (1 to 3 part) reference designates.
    ///
    /// Unqualified names are looked up in the source's default schema first, then in the
    /// remaining schemas ordered by name.
    pub fn resolve_table(&mut self, reference: &[Name]) -> Result<Table> {
        let table = self.lookup_table(reference)?;
        self.tables
            .entry(table.id)
            .or_insert_with(|| table.clone());
        Ok(table)
    }

    fn lookup_table(&self, reference: &[Name]) -> Result<Table> {
        let found = match reference {
            [table] => self.lookup_unqualified_table(table)?,
            [schema, table] => self.lookup_table_in_schema(schema, table)?,
            [source, schema, table] if source.matches(&self.source.name) => {
                self.lookup_table_in_schema(schema, table)?
            }
            _ => None,
        };
        let table = found.ok_or_else(|| Error::TableNotFound(dotted(reference)))?;
        log::debug!("Resolved table `{}` to `{}`.", dotted(reference), table.fqdn);
        Ok(table)
    }

    fn lookup_unqualified_table(&self, name: &Name) -> Result<Option<Table>> {
        let default_schema = self.reader.get_default_schema(self.source.id)?;
        if let Some(schema) = &default_schema {
            if let Some(table) = self.table_in_schema(schema, name)? {
                return Ok(Some(table));
            }
        }
        for schema in self.reader.get_schemas(self.source.id)? {
            if default_schema.as_ref().is_some_and(|d| d.id == schema.id) {
                continue;
            }
            if let Some(table) = self.table_in_schema(&schema, name)? {
                return Ok(Some(table));
            }
        }
        Ok(None)
    }

    fn lookup_table_in_schema(&self, schema: &Name, table: &Name) -> Result<Option<Table>> {
        let schemas = self.reader.get_schemas(self.source.id)?;
        match find_named(&schemas, schema, |s| s.name.as_str()) {
            Some(schema) => self.table_in_schema(schema, table),
            None => Ok(None),
        }
    }

    fn table_in_schema(&self, schema: &Schema, name: &Name) -> Result<Option<Table>> {
        let tables = self.reader.get_tables(schema.id)?;
        Ok(find_named(&tables, name, |t| t.name.as_str()).cloned())
    }

    /// Resolves a column reference, searching scopes from the innermost outwards.
    ///
    /// Unqualified names must be unique within the first scope that contains them.
    pub fn resolve_column(&self, reference: &[Name]) -> Result<ColumnRef> {
        match reference {
            [] => Err(Error::semantic("Empty column reference.")),
            [name] => {
                for scope in self.scopes.iter().rev() {
                    let matches = scope.matching_columns(&self.relations, name);
                    match matches.as_slice() {
                        [] => continue,
                        [column_ref] => return Ok(*column_ref),
                        _ => {
                            let tables = matches
                                .iter()
                                .map(|m| self.relations[m.relation].alias.value.clone())
                                .collect::<Vec<_>>();
                            return Err(Error::semantic(format!(
                                "Column `{}` is ambiguous. It is contained in more than one table: [{}].",
                                name,
                                tables.join(", ")
                            )));
                        }
                    }
                }
                Err(Error::ColumnNotFound(name.value.clone()))
            }
            [qualifier @ .., name] => {
                let relation = self.find_relation(qualifier)?;
                let position = column_position(&self.relations[relation], name)
                    .ok_or_else(|| Error::ColumnNotFound(dotted(reference)))?;
                Ok(ColumnRef { relation, position })
            }
        }
    }

    fn find_relation(&self, qualifier: &[Name]) -> Result<ArenaIndex> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.find_relation(&self.relations, qualifier))
            .ok_or_else(|| Error::TableNotFound(dotted(qualifier)))
    }

    /// Expands `*` (over the innermost scope) or `qualifier.*` into named column references.
    pub fn expand_wildcard(&self, qualifier: Option<&[Name]>) -> Result<Vec<(String, ColumnRef)>> {
        match qualifier {
            None => {
                let scope = self
                    .scopes
                    .last()
                    .filter(|scope| !scope.relations.is_empty())
                    .ok_or_else(|| Error::semantic("SELECT * with no tables specified is not valid."))?;
                Ok(scope.visible_columns(&self.relations))
            }
            Some(qualifier) => {
                let relation = self.find_relation(qualifier)?;
                Ok(self.relations[relation]
                    .columns
                    .iter()
                    .enumerate()
                    .map(|(position, column)| (column.name.clone(), ColumnRef { relation, position }))
                    .collect())
            }
        }
    }

    fn bind_body(&mut self, statement: &Statement) -> Result<BoundBody> {
        match statement {
            Statement::Query(query) => match query.body.as_ref() {
                // `WITH ... INSERT` and `WITH ... UPDATE`: the CTEs are visible to the statement.
                SetExpr::Insert(inner) | SetExpr::Update(inner) => {
                    self.ctes.push(vec![]);
                    let bound = self
                        .bind_with(query)
                        .and_then(|()| self.bind_body(inner));
                    self.ctes.pop();
                    bound
                }
                _ => Ok(BoundBody::Query(self.bind_query(query)?)),
            },
            Statement::Insert(insert) => {
                let target = match &insert.table {
                    TableObject::TableName(name) => self.lookup_target(name)?,
                    _ => {
                        return Err(Error::semantic(
                            "INSERT into a table function is not supported.",
                        ));
                    }
                };
                let source = insert.source.as_ref().ok_or_else(|| {
                    Error::semantic("INSERT without a query or VALUES source is not supported.")
                })?;
                let source = self.bind_query(source)?;
                let names = insert
                    .columns
                    .iter()
                    .map(Name::from_ident)
                    .collect::<Vec<_>>();
                let columns = self.target_columns(&target, &names, source.width(), "INSERT")?;
                Ok(BoundBody::Insert {
                    target,
                    columns,
                    source,
                })
            }
            Statement::CreateTable(create) => {
                let query = create.query.as_ref().ok_or_else(|| {
                    Error::semantic("CREATE TABLE without an AS query is not supported.")
                })?;
                let target = self.lookup_target(&create.name)?;
                let source = self.bind_query(query)?;
                let names = create
                    .columns
                    .iter()
                    .map(|column| Name::from_ident(&column.name))
                    .collect::<Vec<_>>();
                let columns =
                    self.target_columns(&target, &names, source.width(), "CREATE TABLE AS")?;
                Ok(BoundBody::CreateTableAs {
                    target,
                    columns,
                    source,
                })
            }
            Statement::CreateView {
                name,
                columns,
                query,
                ..
            } => {
                let target = self.lookup_target(name)?;
                let source = self.bind_query(query)?;
                let names = columns
                    .iter()
                    .map(|column| Name::from_ident(&column.name))
                    .collect::<Vec<_>>();
                let columns = self.target_columns(&target, &names, source.width(), "CREATE VIEW")?;
                Ok(BoundBody::CreateView {
                    target,
                    columns,
                    source,
                })
            }
            Statement::Update {
                table,
                assignments,
                from,
                selection,
                ..
            } => {
                let mut scope = Scope::default();
                self.bind_table_with_joins(table, &mut scope)?;
                let target = self.scope_target(&scope, "UPDATE")?;
                match from {
                    Some(UpdateTableFromKind::BeforeSet(tables))
                    | Some(UpdateTableFromKind::AfterSet(tables)) => {
                        for table in tables {
                            self.bind_table_with_joins(table, &mut scope)?;
                        }
                    }
                    None => {}
                }
                self.with_scope(scope, |binder| {
                    let mut bound = vec![];
                    for assignment in assignments {
                        bound.extend(binder.bind_assignment(&target, assignment)?);
                    }
                    if let Some(selection) = selection {
                        binder.bind_clause(selection, &[])?;
                    }
                    Ok(BoundBody::Update {
                        target,
                        assignments: bound,
                    })
                })
            }
            Statement::Merge {
                table,
                source,
                on,
                clauses,
                ..
            } => {
                let mut scope = Scope::default();
                self.bind_table_factor(table, &mut scope)?;
                let target = self.scope_target(&scope, "MERGE")?;
                let target_len = scope.relations.len();
                self.bind_table_factor(source, &mut scope)?;
                let source_scope = Scope {
                    relations: scope.relations[target_len..].to_vec(),
                    ..Default::default()
                };

                self.with_scope(scope.clone(), |binder| binder.bind_clause(on.as_ref(), &[]))?;
                let mut assignments = vec![];
                for clause in clauses {
                    if let Some(predicate) = &clause.predicate {
                        self.with_scope(scope.clone(), |binder| binder.bind_clause(predicate, &[]))?;
                    }
                    match &clause.action {
                        MergeAction::Update {
                            assignments: updates,
                            ..
                        } => {
                            self.with_scope(scope.clone(), |binder| {
                                for assignment in updates {
                                    assignments.extend(binder.bind_assignment(&target, assignment)?);
                                }
                                Ok(())
                            })?;
                        }
                        MergeAction::Insert(insert) => {
                            let rows = match &insert.kind {
                                MergeInsertKind::Values(values) => &values.rows,
                                _ => {
                                    return Err(Error::semantic(
                                        "MERGE INSERT ROW is not supported.",
                                    ));
                                }
                            };
                            let names = insert
                                .columns
                                .iter()
                                .map(Name::from_ident)
                                .collect::<Vec<_>>();
                            self.with_scope(source_scope.clone(), |binder| {
                                for row in rows {
                                    let columns = binder.target_columns(
                                        &target,
                                        &names,
                                        row.len(),
                                        "MERGE INSERT",
                                    )?;
                                    for (column, expr) in columns.into_iter().zip(row) {
                                        let expr = binder.bind_expr(expr)?;
                                        assignments.push(BoundAssignment { column, expr });
                                    }
                                }
                                Ok(())
                            })?;
                        }
                        _ => {}
                    }
                }
                Ok(BoundBody::Merge {
                    target,
                    assignments,
                })
            }
            other => Err(Error::semantic(format!(
                "Unsupported statement: {}",
                leading_keyword(&other.to_string())
            ))),
        }
    }

    /// Tables written by CREATE TABLE AS, CREATE VIEW and INSERT must already be in the catalog.
    fn lookup_target(&self, name: &ObjectName) -> Result<Table> {
        self.lookup_table(&object_name_parts(name)?)
    }

    fn scope_target(&self, scope: &Scope, statement: &str) -> Result<Table> {
        scope
            .relations
            .first()
            .and_then(|&idx| self.relations[idx].catalog_table())
            .cloned()
            .ok_or_else(|| {
                Error::semantic(format!("{} target must be a catalog table.", statement))
            })
    }

    /// Maps the written columns of `target` to `width` expressions.
    ///
    /// With an explicit column list the counts must match; an implicit list takes the
    /// table's first `width` columns.
    fn target_columns(
        &self,
        target: &Table,
        names: &[Name],
        width: usize,
        statement: &str,
    ) -> Result<Vec<Column>> {
        let all_columns = self.reader.get_columns(target.id)?;
        if names.is_empty() {
            if width > all_columns.len() {
                return Err(Error::semantic(format!(
                    "{} has more expressions than target columns: {} expressions for the {} columns of `{}`.",
                    statement,
                    width,
                    all_columns.len(),
                    target.name
                )));
            }
            return Ok(all_columns.into_iter().take(width).collect());
        }

        let columns = names
            .iter()
            .map(|name| {
                find_named(&all_columns, name, |c| c.name.as_str())
                    .cloned()
                    .ok_or_else(|| Error::ColumnNotFound(format!("{}.{}", target.name, name)))
            })
            .collect::<Result<Vec<_>>>()?;
        if columns.len() != width {
            return Err(Error::semantic(format!(
                "{} has {} target columns but {} expressions.",
                statement,
                columns.len(),
                width
            )));
        }
        Ok(columns)
    }

    fn bind_assignment(
        &mut self,
        target: &Table,
        assignment: &Assignment,
    ) -> Result<Vec<BoundAssignment>> {
        let names = match &assignment.target {
            AssignmentTarget::ColumnName(name) => vec![name],
            AssignmentTarget::Tuple(names) => names.iter().collect(),
        };
        let columns = names
            .into_iter()
            .map(|name| {
                let parts = object_name_parts(name)?;
                let column_name = parts
                    .last()
                    .ok_or_else(|| Error::semantic("Empty assignment target."))?;
                let all_columns = self.reader.get_columns(target.id)?;
                find_named(&all_columns, column_name, |c| c.name.as_str())
                    .cloned()
                    .ok_or_else(|| Error::ColumnNotFound(format!("{}.{}", target.name, column_name)))
            })
            .collect::<Result<Vec<_>>>()?;

        if let [column] = columns.as_slice() {
            let expr = self.bind_expr(&assignment.value)?;
            return Ok(vec![BoundAssignment {
                column: column.clone(),
                expr,
            }]);
        }

        let exprs = match &assignment.value {
            Expr::Tuple(values) if values.len() == columns.len() => values
                .iter()
                .map(|value| self.bind_expr(value))
                .collect::<Result<Vec<_>>>()?,
            Expr::Subquery(query) => {
                let query = self.bind_query(query)?;
                if query.width() != columns.len() {
                    return Err(Error::semantic(format!(
                        "Row assignment of {} columns from a subquery returning {} columns.",
                        columns.len(),
                        query.width()
                    )));
                }
                (0..columns.len())
                    .map(|position| BoundExpr::Subquery {
                        query: Box::new(query.clone()),
                        position: Some(position),
                    })
                    .collect()
            }
            _ => {
                return Err(Error::semantic(format!(
                    "Row assignment of {} columns needs as many values.",
                    columns.len()
                )));
            }
        };
        Ok(columns
            .into_iter()
            .zip(exprs)
            .map(|(column, expr)| BoundAssignment { column, expr })
            .collect())
    }

    pub fn bind_query(&mut self, query: &Query) -> Result<BoundQuery> {
        self.ctes.push(vec![]);
        let bound = self.bind_query_in_frame(query);
        self.ctes.pop();
        bound
    }

    fn bind_query_in_frame(&mut self, query: &Query) -> Result<BoundQuery> {
        self.bind_with(query)?;
        self.bind_set_expr(&query.body, query.order_by.as_ref())
    }

    /// Registers the CTEs of `query` in the innermost frame.
    fn bind_with(&mut self, query: &Query) -> Result<()> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.bind_cte(cte, with.recursive)?;
            }
        }
        Ok(())
    }

    fn bind_cte(&mut self, cte: &Cte, recursive: bool) -> Result<()> {
        let name = Name::from_ident(&cte.alias.name);
        let query = &cte.query;
        let idx = match query.body.as_ref() {
            SetExpr::SetOperation { left, right, .. } if recursive && query.with.is_none() => {
                // The anchor branch fixes the columns; the recursive branch may reference the CTE.
                let anchor = self.bind_set_expr(left, None)?;
                let idx = self.allocate_derived(name, RelationKind::Cte, &anchor, &cte.alias.columns)?;
                self.register_cte(idx);
                let recursive_part = self.bind_set_expr(right, None)?;
                if recursive_part.width() != anchor.width() {
                    return Err(Error::semantic(format!(
                        "Recursive query `{}` branches return {} and {} columns.",
                        cte.alias.name,
                        anchor.width(),
                        recursive_part.width()
                    )));
                }
                for branch in recursive_part.branches {
                    for (column, projection) in self.relations[idx].columns.iter_mut().zip(branch) {
                        if let ColumnOrigin::Derived(exprs) = &mut column.origin {
                            exprs.push(projection.expr);
                        }
                    }
                }
                self.bind_order_by_output(query.order_by.as_ref(), &anchor)?;
                return Ok(());
            }
            _ => {
                let bound = self.bind_query(query)?;
                self.allocate_derived(name, RelationKind::Cte, &bound, &cte.alias.columns)?
            }
        };
        self.register_cte(idx);
        Ok(())
    }

    fn register_cte(&mut self, idx: ArenaIndex) {
        log::debug!("Registered CTE `{}`.", self.relations[idx].alias);
        if let Some(frame) = self.ctes.last_mut() {
            frame.push(idx);
        }
    }

    fn find_cte(&self, name: &Name) -> Option<ArenaIndex> {
        self.ctes
            .iter()
            .rev()
            .flat_map(|frame| frame.iter().rev())
            .copied()
            .find(|&idx| name.same_as(&self.relations[idx].alias))
    }

    fn allocate_derived(
        &mut self,
        alias: Name,
        kind: RelationKind,
        query: &BoundQuery,
        column_aliases: &[TableAliasColumnDef],
    ) -> Result<ArenaIndex> {
        let columns = (0..query.width())
            .map(|position| RelationColumn {
                name: query.branches[0][position].name.clone(),
                origin: ColumnOrigin::Derived(
                    query
                        .branches
                        .iter()
                        .map(|branch| branch[position].expr.clone())
                        .collect(),
                ),
            })
            .collect();
        let mut relation = Relation {
            alias,
            kind,
            columns,
        };
        rename_columns(&mut relation, column_aliases)?;
        Ok(self.relations.allocate(relation))
    }

    fn bind_set_expr(&mut self, body: &SetExpr, order_by: Option<&OrderBy>) -> Result<BoundQuery> {
        match body {
            SetExpr::Select(select) => self.bind_select(select, order_by),
            SetExpr::Query(query) => {
                let bound = self.bind_query(query)?;
                self.bind_order_by_output(order_by, &bound)?;
                Ok(bound)
            }
            SetExpr::SetOperation {
                op, left, right, ..
            } => {
                let mut bound = self.bind_set_expr(left, None)?;
                let right = self.bind_set_expr(right, None)?;
                if bound.width() != right.width() {
                    return Err(Error::semantic(format!(
                        "Each {} query must have the same number of columns: {} and {}.",
                        op,
                        bound.width(),
                        right.width()
                    )));
                }
                bound.branches.extend(right.branches);
                self.bind_order_by_output(order_by, &bound)?;
                Ok(bound)
            }
            SetExpr::Values(values) => self.bind_values(values),
            other => Err(Error::semantic(format!(
                "Unsupported query body: {}",
                leading_keyword(&other.to_string())
            ))),
        }
    }

    /// ORDER BY over a set operation sees only the output column names.
    fn bind_order_by_output(&mut self, order_by: Option<&OrderBy>, query: &BoundQuery) -> Result<()> {
        match order_by {
            Some(order_by) => self.with_scope(Scope::default(), |binder| {
                binder.bind_clause(order_by, &query.column_names())
            }),
            None => Ok(()),
        }
    }

    fn bind_values(&mut self, values: &Values) -> Result<BoundQuery> {
        let mut branches = vec![];
        for row in &values.rows {
            if let Some(first) = values.rows.first() {
                if first.len() != row.len() {
                    return Err(Error::semantic("VALUES lists must all be the same length."));
                }
            }
            let mut projections = vec![];
            for (idx, expr) in row.iter().enumerate() {
                projections.push(BoundProjection {
                    name: format!("column{}", idx + 1),
                    expr: self.bind_expr(expr)?,
                });
            }
            branches.push(projections);
        }
        Ok(BoundQuery { branches })
    }

    fn bind_select(&mut self, select: &Select, order_by: Option<&OrderBy>) -> Result<BoundQuery> {
        let mut scope = Scope::default();
        for table in &select.from {
            self.bind_table_with_joins(table, &mut scope)?;
        }

        self.with_scope(scope, |binder| {
            if let Some(selection) = &select.selection {
                binder.bind_clause(selection, &[])?;
            }

            let mut projections = vec![];
            for item in &select.projection {
                binder.bind_select_item(item, &mut projections)?;
            }
            let names = projections
                .iter()
                .map(|p: &BoundProjection| p.name.clone())
                .collect::<Vec<_>>();

            binder.bind_clause(&select.group_by, &names)?;
            if let Some(having) = &select.having {
                binder.bind_clause(having, &[])?;
            }
            if let Some(order_by) = order_by {
                binder.bind_clause(order_by, &names)?;
            }
            Ok(BoundQuery {
                branches: vec![projections],
            })
        })
    }

    fn bind_select_item(
        &mut self,
        item: &SelectItem,
        projections: &mut Vec<BoundProjection>,
    ) -> Result<()> {
        match item {
            SelectItem::UnnamedExpr(expr) => projections.push(BoundProjection {
                name: projection_name(expr),
                expr: self.bind_expr(expr)?,
            }),
            SelectItem::ExprWithAlias { expr, alias } => projections.push(BoundProjection {
                name: Name::from_ident(alias).normalized(),
                expr: self.bind_expr(expr)?,
            }),
            SelectItem::Wildcard(options) => {
                check_wildcard_options(options)?;
                for (name, column_ref) in self.expand_wildcard(None)? {
                    projections.push(BoundProjection {
                        name,
                        expr: BoundExpr::Column(column_ref),
                    });
                }
            }
            SelectItem::QualifiedWildcard(kind, options) => {
                check_wildcard_options(options)?;
                let qualifier = match kind {
                    SelectItemQualifiedWildcardKind::ObjectName(name) => object_name_parts(name)?,
                    _ => {
                        return Err(Error::semantic(
                            "Wildcards over expressions are not supported.",
                        ));
                    }
                };
                for (name, column_ref) in self.expand_wildcard(Some(&qualifier))? {
                    projections.push(BoundProjection {
                        name,
                        expr: BoundExpr::Column(column_ref),
                    });
                }
            }
        }
        Ok(())
    }

    fn bind_table_with_joins(&mut self, table: &TableWithJoins, scope: &mut Scope) -> Result<()> {
        let chain_start = scope.relations.len();
        self.bind_table_factor(&table.relation, scope)?;
        for join in &table.joins {
            let right_start = scope.relations.len();
            self.bind_table_factor(&join.relation, scope)?;
            match join_constraint(&join.join_operator) {
                Some(JoinConstraint::On(expr)) => {
                    self.with_scope(scope.clone(), |binder| binder.bind_clause(expr, &[]))?;
                }
                Some(JoinConstraint::Using(columns)) => {
                    let names = columns
                        .iter()
                        .map(|column| match object_name_parts(column)?.as_slice() {
                            [name] => Ok(name.clone()),
                            _ => Err(Error::semantic(format!(
                                "Unsupported USING column: {}",
                                column
                            ))),
                        })
                        .collect::<Result<Vec<_>>>()?;
                    self.merge_join_columns(&names, scope, chain_start, right_start)?;
                }
                Some(JoinConstraint::Natural) => {
                    let names = self.common_column_names(scope, chain_start, right_start);
                    self.merge_join_columns(&names, scope, chain_start, right_start)?;
                }
                Some(JoinConstraint::None) | None => {}
            }
        }
        Ok(())
    }

    /// Visible column names shared by both sides of a NATURAL JOIN, in left-side order.
    fn common_column_names(&self, scope: &Scope, chain_start: usize, right_start: usize) -> Vec<Name> {
        let side = |range: &[ArenaIndex]| Scope {
            relations: range.to_vec(),
            hidden: scope.hidden.clone(),
        };
        let left = side(&scope.relations[chain_start..right_start]);
        let right = side(&scope.relations[right_start..]);
        let right_names = right
            .visible_columns(&self.relations)
            .into_iter()
            .map(|(name, _)| Name::new(&name))
            .collect::<Vec<_>>();
        let mut names: Vec<Name> = vec![];
        for (name, _) in left.visible_columns(&self.relations) {
            let name = Name::new(&name);
            if right_names.iter().any(|r| r.same_as(&name)) && !names.iter().any(|n| n.same_as(&name)) {
                names.push(name);
            }
        }
        names
    }

    /// Replaces the USING columns of both join sides with one merged column each.
    ///
    /// The merged relation is placed before the joined relations so `*` lists the merged
    /// columns first.
    fn merge_join_columns(
        &mut self,
        names: &[Name],
        scope: &mut Scope,
        chain_start: usize,
        right_start: usize,
    ) -> Result<()> {
        let left_side = Scope {
            relations: scope.relations[chain_start..right_start].to_vec(),
            hidden: scope.hidden.clone(),
        };
        let right_side = Scope {
            relations: scope.relations[right_start..].to_vec(),
            hidden: scope.hidden.clone(),
        };

        let mut columns = vec![];
        let mut merged = vec![];
        for name in names {
            let left = self.join_column(&left_side, name)?;
            let right = self.join_column(&right_side, name)?;
            columns.push(RelationColumn {
                name: self.relations[left.relation].columns[left.position].name.clone(),
                origin: ColumnOrigin::Derived(vec![BoundExpr::Composite(vec![
                    BoundExpr::Column(left),
                    BoundExpr::Column(right),
                ])]),
            });
            merged.push(left);
            merged.push(right);
        }
        scope.hidden.extend(merged);
        let idx = self.relations.allocate(Relation {
            alias: Name::new(""),
            kind: RelationKind::Using,
            columns,
        });
        scope.relations.insert(chain_start, idx);
        Ok(())
    }

    fn join_column(&self, side: &Scope, name: &Name) -> Result<ColumnRef> {
        match side.matching_columns(&self.relations, name).as_slice() {
            [column_ref] => Ok(*column_ref),
            [] => Err(Error::ColumnNotFound(name.value.clone())),
            _ => Err(Error::semantic(format!(
                "Common column name `{}` appears more than once in the join.",
                name
            ))),
        }
    }

    fn bind_table_factor(&mut self, factor: &TableFactor, scope: &mut Scope) -> Result<()> {
        match factor {
            TableFactor::Table { name, alias, .. } => {
                let parts = object_name_parts(name)?;
                let alias_name = alias
                    .as_ref()
                    .map(|alias| Name::from_ident(&alias.name))
                    .or_else(|| parts.last().cloned())
                    .ok_or_else(|| Error::semantic("Empty table name."))?;
                let column_aliases = alias.as_ref().map_or(&[][..], |a| a.columns.as_slice());

                let cte = match parts.as_slice() {
                    [single] => self.find_cte(single),
                    _ => None,
                };
                let mut relation = match cte {
                    Some(cte_idx) => Relation {
                        alias: alias_name,
                        kind: RelationKind::Cte,
                        columns: self.relations[cte_idx]
                            .columns
                            .iter()
                            .enumerate()
                            .map(|(position, column)| RelationColumn {
                                name: column.name.clone(),
                                origin: ColumnOrigin::Derived(vec![BoundExpr::Column(ColumnRef {
                                    relation: cte_idx,
                                    position,
                                })]),
                            })
                            .collect(),
                    },
                    None => {
                        let table = self.resolve_table(&parts)?;
                        let columns = self
                            .reader
                            .get_columns(table.id)?
                            .into_iter()
                            .map(|column| RelationColumn {
                                name: column.name.clone(),
                                origin: ColumnOrigin::Catalog(column),
                            })
                            .collect();
                        Relation {
                            alias: alias_name,
                            kind: RelationKind::Table(table),
                            columns,
                        }
                    }
                };
                rename_columns(&mut relation, column_aliases)?;
                let idx = self.relations.allocate(relation);
                scope.add(&self.relations, idx)
            }
            TableFactor::Derived {
                lateral,
                subquery,
                alias,
                ..
            } => {
                let query = if *lateral {
                    self.with_scope(scope.clone(), |binder| binder.bind_query(subquery))?
                } else {
                    self.bind_query(subquery)?
                };
                let alias_name = alias
                    .as_ref()
                    .map(|alias| Name::from_ident(&alias.name))
                    .unwrap_or_else(|| Name {
                        value: format!("subquery_{}", self.relations.len()),
                        quoted: true,
                    });
                let column_aliases = alias.as_ref().map_or(&[][..], |a| a.columns.as_slice());
                let idx =
                    self.allocate_derived(alias_name, RelationKind::Derived, &query, column_aliases)?;
                scope.add(&self.relations, idx)
            }
            TableFactor::NestedJoin {
                table_with_joins,
                alias: None,
            } => self.bind_table_with_joins(table_with_joins, scope),
            other => Err(Error::semantic(format!(
                "Unsupported table expression: {}",
                other
            ))),
        }
    }
}

fn rename_columns(relation: &mut Relation, column_aliases: &[TableAliasColumnDef]) -> Result<()> {
    if column_aliases.len() > relation.columns.len() {
        return Err(Error::semantic(format!(
            "`{}` has {} columns available but {} columns specified.",
            relation.alias,
            relation.columns.len(),
            column_aliases.len()
        )));
    }
    for (column, alias) in relation.columns.iter_mut().zip(column_aliases) {
        column.name = Name::from_ident(&alias.name).normalized();
    }
    Ok(())
}

fn join_constraint(operator: &JoinOperator) -> Option<&JoinConstraint> {
    match operator {
        JoinOperator::Join(constraint)
        | JoinOperator::Inner(constraint)
        | JoinOperator::Left(constraint)
        | JoinOperator::LeftOuter(constraint)
        | JoinOperator::Right(constraint)
        | JoinOperator::RightOuter(constraint)
        | JoinOperator::FullOuter(constraint) => Some(constraint),
        _ => None,
    }
}

fn check_wildcard_options(options: &WildcardAdditionalOptions) -> Result<()> {
    if options.opt_ilike.is_some()
        || options.opt_exclude.is_some()
        || options.opt_except.is_some()
        || options.opt_replace.is_some()
        || options.opt_rename.is_some()
    {
        return Err(Error::semantic(format!(
            "Wildcard options are not supported: *{}",
            options
        )));
    }
    Ok(())
}

/// Output name of an unaliased projection.
fn projection_name(expr: &Expr) -> String {
    match expr {
        Expr::Identifier(ident) => Name::from_ident(ident).normalized(),
        Expr::CompoundIdentifier(idents) => idents
            .last()
            .map_or_else(|| "?column?".to_owned(), |ident| Name::from_ident(ident).normalized()),
        Expr::Nested(inner) | Expr::Cast { expr: inner, .. } => projection_name(inner),
        Expr::Function(function) => function
            .name
            .0
            .last()
            .and_then(|part| part.as_ident())
            .map_or_else(|| "?column?".to_owned(), |ident| Name::from_ident(ident).normalized()),
        _ => "?column?".to_owned(),
    }
}

fn leading_keyword(sql: &str) -> String {
    sql.split_whitespace()
        .next()
        .unwrap_or_default()
        .to_uppercase()
}
