//! SQL rendering for [`Query`].
//!
//! Two renderings come out of the same walk:
//!
//! - [`Query::to_sql`] inlines every literal. This is the canonical text used
//!   as a cache key and as validator input.
//! - [`Query::compile`] emits `$n` placeholders plus the ordered bindings,
//!   which is what a store executes.

use super::*;

/// SQL with positional bindings.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub bindings: Vec<Value>,
    /// Whether the statement reads rows (select/first/pluck).
    pub is_read: bool,
}

impl Query {
    /// Canonical text with literals inlined.
    pub fn to_sql(&self) -> String {
        let mut renderer = Renderer::inline();
        renderer.statement(self)
    }

    /// Parameterized SQL for execution.
    pub fn compile(&self) -> CompiledQuery {
        let mut renderer = Renderer::parameterized();
        let sql = renderer.statement(self);
        CompiledQuery {
            sql,
            bindings: renderer.bindings,
            is_read: self.is_read(),
        }
    }
}

struct Renderer {
    parameterized: bool,
    bindings: Vec<Value>,
}

impl Renderer {
    fn inline() -> Self {
        Self {
            parameterized: false,
            bindings: Vec::new(),
        }
    }

    fn parameterized() -> Self {
        Self {
            parameterized: true,
            bindings: Vec::new(),
        }
    }

    /// Nulls stay inline so the server infers their type from the column.
    fn value(&mut self, value: &Value) -> String {
        if self.parameterized && *value != Value::Null {
            self.bindings.push(value.clone());
            format!("${}", self.bindings.len())
        } else {
            value.to_string()
        }
    }

    fn statement(&mut self, query: &Query) -> String {
        match query.method {
            Method::Select | Method::First | Method::Pluck => self.select(query),
            Method::Insert => self.insert(query),
            Method::Update => self.update(query),
            Method::Del => self.delete(query),
            Method::Truncate => format!("truncate {}", table(query)),
        }
    }

    fn select(&mut self, query: &Query) -> String {
        let mut sql = String::from("select ");

        let mut distinct = false;
        let mut columns: Vec<String> = Vec::new();
        if let (Method::Pluck, Some(column)) = (query.method, &query.single.pluck) {
            columns.push(wrap(column));
        } else {
            for statement in &query.statements {
                match statement {
                    Statement::Columns { value, distinct: d } => {
                        distinct |= *d;
                        columns.extend(value.iter().map(|c| wrap(c)));
                    }
                    Statement::Aggregate { function, column } => {
                        columns.push(aggregate(*function, column));
                    }
                    _ => {}
                }
            }
        }

        if distinct {
            sql.push_str("distinct ");
        }
        if columns.is_empty() {
            sql.push('*');
        } else {
            sql.push_str(&columns.join(", "));
        }

        sql.push_str(" from ");
        sql.push_str(&table(query));

        for statement in &query.statements {
            if let Statement::Join(join) = statement {
                sql.push(' ');
                sql.push_str(&render_join(join));
            }
        }

        self.push_wheres(&mut sql, query);

        let groups: Vec<String> = query
            .statements
            .iter()
            .filter_map(|s| match s {
                Statement::Group { value, raw: true } => Some(value.join(", ")),
                Statement::Group { value, raw: false } => {
                    Some(value.iter().map(|c| wrap(c)).collect::<Vec<_>>().join(", "))
                }
                _ => None,
            })
            .collect();
        if !groups.is_empty() {
            sql.push_str(" group by ");
            sql.push_str(&groups.join(", "));
        }

        let havings: Vec<&WhereClause> = query
            .statements
            .iter()
            .filter_map(|s| match s {
                Statement::Having(clause) => Some(clause),
                _ => None,
            })
            .collect();
        if let Some(having) = self.clauses(&havings) {
            sql.push_str(" having ");
            sql.push_str(&having);
        }

        let orders: Vec<String> = query
            .statements
            .iter()
            .filter_map(|s| match s {
                Statement::Order { value, raw: true, .. } => Some(value.clone()),
                Statement::Order {
                    value,
                    direction,
                    raw: false,
                } => Some(format!(
                    "{} {}",
                    wrap(value),
                    match direction {
                        Direction::Asc => "asc",
                        Direction::Desc => "desc",
                    }
                )),
                _ => None,
            })
            .collect();
        if !orders.is_empty() {
            sql.push_str(" order by ");
            sql.push_str(&orders.join(", "));
        }

        let limit = match query.method {
            Method::First => Some(1),
            _ => query.single.limit,
        };
        if let Some(n) = limit {
            sql.push_str(&format!(" limit {}", n));
        }
        if let Some(n) = query.single.offset {
            sql.push_str(&format!(" offset {}", n));
        }

        for statement in &query.statements {
            if let Statement::Union { query: other, all } = statement {
                sql.push_str(if *all { " union all " } else { " union " });
                let rendered = self.statement(other);
                sql.push_str(&rendered);
            }
        }

        match query.single.lock {
            Some(Lock::ForUpdate) => sql.push_str(" for update"),
            Some(Lock::ForShare) => sql.push_str(" for share"),
            None => {}
        }

        sql
    }

    fn insert(&mut self, query: &Query) -> String {
        let mut sql = format!("insert into {}", table(query));
        let rows = &query.single.insert;

        let mut columns: Vec<&String> = rows.iter().flat_map(|r| r.keys()).collect();
        columns.sort();
        columns.dedup();

        if columns.is_empty() {
            sql.push_str(" default values");
        } else {
            let names: Vec<String> = columns.iter().map(|c| wrap(c)).collect();
            sql.push_str(&format!(" ({}) values ", names.join(", ")));
            let mut tuples = Vec::with_capacity(rows.len());
            for row in rows {
                let values: Vec<String> = columns
                    .iter()
                    .map(|c| match row.get(*c) {
                        Some(v) => self.value(v),
                        None => "default".to_string(),
                    })
                    .collect();
                tuples.push(format!("({})", values.join(", ")));
            }
            sql.push_str(&tuples.join(", "));
        }

        push_returning(&mut sql, query);
        sql
    }

    fn update(&mut self, query: &Query) -> String {
        let mut sql = format!("update {} set ", table(query));

        let mut assignments: Vec<String> = Vec::new();
        for (column, value) in &query.single.update {
            let rendered = self.value(value);
            assignments.push(format!("{} = {}", wrap(column), rendered));
        }
        if let Some(counter) = &query.single.counter {
            let amount = self.value(&counter.amount);
            let sign = if counter.decrement { '-' } else { '+' };
            assignments.push(format!(
                "{} = {} {} {}",
                wrap(&counter.column),
                wrap(&counter.column),
                sign,
                amount
            ));
        }
        sql.push_str(&assignments.join(", "));

        self.push_wheres(&mut sql, query);
        push_returning(&mut sql, query);
        sql
    }

    fn delete(&mut self, query: &Query) -> String {
        let mut sql = format!("delete from {}", table(query));
        self.push_wheres(&mut sql, query);
        push_returning(&mut sql, query);
        sql
    }

    fn push_wheres(&mut self, sql: &mut String, query: &Query) {
        let wheres: Vec<&WhereClause> = query.wheres().collect();
        if let Some(rendered) = self.clauses(&wheres) {
            sql.push_str(" where ");
            sql.push_str(&rendered);
        }
    }

    /// Join clauses with their connectives; the first connective is dropped.
    fn clauses(&mut self, clauses: &[&WhereClause]) -> Option<String> {
        let mut out = String::new();
        for clause in clauses {
            let Some(rendered) = self.clause(clause) else {
                continue;
            };
            if !out.is_empty() {
                out.push_str(match clause.connective {
                    BoolOp::And => " and ",
                    BoolOp::Or => " or ",
                });
            }
            out.push_str(&rendered);
        }
        if out.is_empty() { None } else { Some(out) }
    }

    fn clause(&mut self, clause: &WhereClause) -> Option<String> {
        let not = clause.not;
        let rendered = match &clause.predicate {
            Predicate::Basic {
                column,
                operator,
                value,
            } => {
                let value = self.value(value);
                let expr = format!("{} {} {}", wrap(column), operator.as_str(), value);
                if not { format!("not {}", expr) } else { expr }
            }
            Predicate::In { column, values } => {
                if values.is_empty() {
                    // An empty set matches nothing; negated it matches everything.
                    return Some(if not { "1 = 1" } else { "1 = 0" }.to_string());
                }
                let values: Vec<String> = values.iter().map(|v| self.value(v)).collect();
                format!(
                    "{} {}in ({})",
                    wrap(column),
                    if not { "not " } else { "" },
                    values.join(", ")
                )
            }
            Predicate::Null { column } => {
                format!("{} is {}null", wrap(column), if not { "not " } else { "" })
            }
            Predicate::Between { column, low, high } => {
                let low = self.value(low);
                let high = self.value(high);
                format!(
                    "{} {}between {} and {}",
                    wrap(column),
                    if not { "not " } else { "" },
                    low,
                    high
                )
            }
            Predicate::Raw { sql, bindings } => {
                let expr = self.raw(sql, bindings);
                if not { format!("not {}", expr) } else { expr }
            }
            Predicate::Exists { query } => {
                let inner = self.statement(query);
                format!("{}exists ({})", if not { "not " } else { "" }, inner)
            }
            Predicate::Wrapped { callback } => {
                let mut nested = Query::default();
                if !callback.call(&mut nested) {
                    tracing::warn!("skipping uncompiled callable {}", callback.source());
                    return None;
                }
                let wheres: Vec<&WhereClause> = nested.wheres().collect();
                let inner = self.clauses(&wheres)?;
                format!("{}({})", if not { "not " } else { "" }, inner)
            }
        };
        Some(rendered)
    }

    /// Substitute `?` placeholders left to right.
    fn raw(&mut self, sql: &str, bindings: &[Value]) -> String {
        let mut out = String::with_capacity(sql.len());
        let mut bindings = bindings.iter();
        for c in sql.chars() {
            match (c, bindings.as_slice().is_empty()) {
                ('?', false) => {
                    if let Some(value) = bindings.next() {
                        let rendered = self.value(value);
                        out.push_str(&rendered);
                    }
                }
                _ => out.push(c),
            }
        }
        out
    }
}

fn push_returning(sql: &mut String, query: &Query) {
    if !query.single.returning.is_empty() {
        let columns: Vec<String> = query.single.returning.iter().map(|c| wrap(c)).collect();
        sql.push_str(" returning ");
        sql.push_str(&columns.join(", "));
    }
}

fn render_join(join: &JoinClause) -> String {
    match (join.kind, &join.on) {
        (JoinKind::Raw, _) => join.table.clone(),
        (kind, Some(on)) => format!(
            "{} {} on {} {} {}",
            kind.keyword(),
            wrap(&join.table),
            wrap(&on.first),
            on.operator.as_str(),
            wrap(&on.second)
        ),
        (kind, None) => format!("{} {}", kind.keyword(), wrap(&join.table)),
    }
}

fn aggregate(function: AggregateFn, column: &str) -> String {
    let (column, alias) = split_alias(column);
    let target = if column == "*" {
        "*".to_string()
    } else {
        wrap(column)
    };
    match alias {
        Some(alias) => format!("{}({}) as {}", function.as_str(), target, quote(alias)),
        None => format!("{}({})", function.as_str(), target),
    }
}

fn table(query: &Query) -> String {
    let name = query.single.table.as_deref().unwrap_or_default();
    match &query.single.schema {
        Some(schema) => format!("{}.{}", quote(schema), wrap(name)),
        None => wrap(name),
    }
}

fn split_alias(identifier: &str) -> (&str, Option<&str>) {
    let lower = identifier.to_ascii_lowercase();
    match lower.find(" as ") {
        Some(i) => (identifier[..i].trim(), Some(identifier[i + 4..].trim())),
        None => (identifier.trim(), None),
    }
}

/// Quote a possibly dotted, possibly aliased identifier.
fn wrap(identifier: &str) -> String {
    let (name, alias) = split_alias(identifier);
    let quoted = name
        .split('.')
        .map(|part| if part == "*" { "*".to_string() } else { quote(part) })
        .collect::<Vec<_>>()
        .join(".");
    match alias {
        Some(alias) => format!("{} as {}", quoted, quote(alias)),
        None => quoted,
    }
}

fn quote(part: &str) -> String {
    format!("\"{}\"", part.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_simple_select() {
        assert_eq!(Query::table("users").to_sql(), r#"select * from "users""#);
    }

    #[test]
    fn test_select_columns_where() {
        let query = Query::table("items")
            .select(["id", "name"])
            .where_op("age", Operator::Gt, 10);
        assert_eq!(
            query.to_sql(),
            r#"select "id", "name" from "items" where "age" > 10"#
        );
    }

    #[test]
    fn test_select_complex() {
        let query = Query::table("items")
            .with_schema("shop")
            .distinct(["category"])
            .where_eq("active", true)
            .or_where("name", "o'brien")
            .where_in("id", [1, 2, 3])
            .where_not_null("deleted_at")
            .order_by("created_at", Direction::Desc)
            .limit(10)
            .offset(20);
        assert_eq!(
            query.to_sql(),
            r#"select distinct "category" from "shop"."items" where "active" = true or "name" = 'o''brien' and "id" in (1, 2, 3) and "deleted_at" is not null order by "created_at" desc limit 10 offset 20"#
        );
    }

    #[test]
    fn test_aggregates_and_grouping() {
        let query = Query::table("orders")
            .column("user_id")
            .count("* as n")
            .sum("total")
            .group_by(["user_id"])
            .having("total", Operator::Gt, 100);
        assert_eq!(
            query.to_sql(),
            r#"select "user_id", count(*) as "n", sum("total") from "orders" group by "user_id" having "total" > 100"#
        );
    }

    #[test]
    fn test_joins_render_keywords() {
        let query = Query::table("items")
            .inner_join("owners", "items.owner_id", "owners.id")
            .cross_join("tags");
        assert_eq!(
            query.to_sql(),
            r#"select * from "items" inner join "owners" on "items"."owner_id" = "owners"."id" cross join "tags""#
        );
    }

    #[test]
    fn test_first_and_pluck() {
        assert_eq!(
            Query::table("items").first().to_sql(),
            r#"select * from "items" limit 1"#
        );
        assert_eq!(
            Query::table("items").pluck("name").to_sql(),
            r#"select "name" from "items""#
        );
    }

    #[test]
    fn test_insert() {
        let query = Query::table("items")
            .insert(vec![
                record(&[("name", "a".into()), ("age", 3.into())]),
                record(&[("name", "b".into())]),
            ])
            .returning(["id"]);
        assert_eq!(
            query.to_sql(),
            r#"insert into "items" ("age", "name") values (3, 'a'), (default, 'b') returning "id""#
        );
    }

    #[test]
    fn test_update_and_counter() {
        let query = Query::table("items")
            .update(record(&[("name", "x".into())]))
            .where_eq("id", 7);
        assert_eq!(
            query.to_sql(),
            r#"update "items" set "name" = 'x' where "id" = 7"#
        );

        let query = Query::table("items").decrement("stock", 2).where_eq("id", 7);
        assert_eq!(
            query.to_sql(),
            r#"update "items" set "stock" = "stock" - 2 where "id" = 7"#
        );
    }

    #[test]
    fn test_delete_and_truncate() {
        assert_eq!(
            Query::table("items").del().where_eq("id", 1).to_sql(),
            r#"delete from "items" where "id" = 1"#
        );
        assert_eq!(Query::table("items").truncate().to_sql(), r#"truncate "items""#);
    }

    #[test]
    fn test_wrapped_group() {
        let adults = Callable::new("adults", |q: &mut Query| {
            q.edit(|q| q.where_op("age", Operator::Gte, 18).or_where("guardian", true));
        });
        let query = Query::table("people").where_eq("active", true).where_group(adults);
        assert_eq!(
            query.to_sql(),
            r#"select * from "people" where "active" = true and ("age" >= 18 or "guardian" = true)"#
        );
    }

    #[test]
    fn test_exists_and_union() {
        let query = Query::table("items")
            .where_exists(Query::table("owners").where_raw("owners.id = items.owner_id", vec![]))
            .union_all(Query::table("archived_items"));
        assert_eq!(
            query.to_sql(),
            r#"select * from "items" where exists (select * from "owners" where owners.id = items.owner_id) union all select * from "archived_items""#
        );
    }

    #[test]
    fn test_compile_uses_placeholders() {
        let query = Query::table("items")
            .select(["id"])
            .where_op("age", Operator::Gt, 10)
            .where_raw("lower(name) = ?", vec!["bob".into()])
            .where_between("score", 1.5, 9.5);
        let compiled = query.compile();
        assert_eq!(
            compiled.sql,
            r#"select "id" from "items" where "age" > $1 and lower(name) = $2 and "score" between $3 and $4"#
        );
        assert_eq!(
            compiled.bindings,
            vec![
                Value::Int(10),
                Value::String("bob".into()),
                Value::Float(1.5),
                Value::Float(9.5)
            ]
        );
        assert!(compiled.is_read);
    }

    #[test]
    fn test_empty_in_matches_nothing() {
        let empty: Vec<i64> = Vec::new();
        assert_eq!(
            Query::table("items").where_in("id", empty).to_sql(),
            r#"select * from "items" where 1 = 0"#
        );
    }

    #[test]
    fn test_lock_clause() {
        assert_eq!(
            Query::table("items").for_update().to_sql(),
            r#"select * from "items" for update"#
        );
    }
}
