//! Statement parser for the in-memory store.
//!
//! Covers the statement shapes the CRUD layer generates plus the DDL its
//! callers need: `CREATE TABLE` (plain, super, `USING`), `DROP TABLE`,
//! `INSERT` (optionally `USING ... TAGS`), and single-table `SELECT` with
//! `WHERE`, `GROUP BY`, `ORDER BY` and `LIMIT ... OFFSET`.
//!
//! Placeholders are already interpolated when text reaches this module.

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case},
    character::complete::{alpha1, alphanumeric1, char, digit1, multispace0, satisfy},
    combinator::{all_consuming, map, map_res, not, opt, peek, recognize, value},
    multi::{many0_count, many1, separated_list0, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use crate::error::StoreError;

// =============================================================================
// AST
// =============================================================================

/// Declared column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Timestamp,
    Bool,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Float,
    Double,
    /// Fixed-width bytes, returned as a byte buffer.
    Binary(usize),
    /// Fixed-width text, returned as a string.
    NChar(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDecl {
    pub name: String,
    pub ty: ColumnType,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// The store clock.
    Now,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    And(Vec<Expr>),
    Compare {
        column: String,
        op: CmpOp,
        value: Literal,
    },
    In {
        column: String,
        values: Vec<Literal>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectItem {
    Column(String),
    Last(String),
    CountAll,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    /// Empty means `*`.
    pub items: Vec<SelectItem>,
    pub from: String,
    pub filter: Option<Expr>,
    pub group_by: Vec<String>,
    /// Column and whether it sorts descending.
    pub order_by: Option<(String, bool)>,
    pub limit: Option<usize>,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    CreateTable {
        name: String,
        if_not_exists: bool,
        columns: Vec<ColumnDecl>,
        tags: Vec<ColumnDecl>,
    },
    CreateChild {
        name: String,
        if_not_exists: bool,
        parent: String,
        tag_values: Vec<Literal>,
    },
    DropTable {
        name: String,
        if_exists: bool,
    },
    Insert {
        table: String,
        using: Option<(String, Vec<Literal>)>,
        columns: Option<Vec<String>>,
        rows: Vec<Vec<Literal>>,
    },
    Select(Select),
}

/// Parses one statement.
pub fn parse_statement(sql: &str) -> Result<Statement, StoreError> {
    let input = sql.trim();
    match all_consuming(ws(alt((create_table, drop_table, insert_into, select_from))))(input) {
        Ok((_, stmt)) => Ok(stmt),
        Err(nom::Err::Error(e) | nom::Err::Failure(e)) => Err(syntax(e.input)),
        Err(nom::Err::Incomplete(_)) => Err(syntax(input)),
    }
}

fn syntax(near: &str) -> StoreError {
    StoreError::Syntax {
        near: near.chars().take(40).collect(),
        message: "unexpected input".into(),
    }
}

// =============================================================================
// TOKENS
// =============================================================================

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// A case-insensitive keyword not followed by an identifier character.
fn kw<'a>(word: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    ws(terminated(tag_no_case(word), not(peek(satisfy(is_ident_char)))))
}

fn punct<'a>(c: char) -> impl FnMut(&'a str) -> IResult<&'a str, char> {
    ws(char(c))
}

fn ident(input: &str) -> IResult<&str, String> {
    map(
        ws(recognize(pair(
            alt((alpha1, tag("_"))),
            many0_count(alt((alphanumeric1, tag("_")))),
        ))),
        str::to_string,
    )(input)
}

fn idents(input: &str) -> IResult<&str, Vec<String>> {
    separated_list1(punct(','), ident)(input)
}

fn paren_idents(input: &str) -> IResult<&str, Vec<String>> {
    delimited(punct('('), idents, punct(')'))(input)
}

/// `'text'` or `"text"`; a backslash escapes the next character.
fn quoted(input: &str) -> IResult<&str, String> {
    let (rest, quote) = alt((char('\''), char('"')))(input)?;
    let mut out = String::new();
    let mut chars = rest.char_indices();
    while let Some((i, c)) = chars.next() {
        if c == '\\' {
            if let Some((_, escaped)) = chars.next() {
                out.push(escaped);
            }
        } else if c == quote {
            return Ok((&rest[i + c.len_utf8()..], out));
        } else {
            out.push(c);
        }
    }
    Err(nom::Err::Error(nom::error::Error::new(
        input,
        nom::error::ErrorKind::Char,
    )))
}

fn number(input: &str) -> IResult<&str, Literal> {
    map_res(
        recognize(tuple((opt(char('-')), digit1, opt(pair(char('.'), digit1))))),
        |text: &str| {
            if text.contains('.') {
                text.parse::<f64>().map(Literal::Float).map_err(|_| ())
            } else {
                text.parse::<i64>().map(Literal::Int).map_err(|_| ())
            }
        },
    )(input)
}

fn literal(input: &str) -> IResult<&str, Literal> {
    ws(alt((
        map(quoted, Literal::Text),
        number,
        value(Literal::Null, kw("NULL")),
        value(Literal::Bool(true), kw("TRUE")),
        value(Literal::Bool(false), kw("FALSE")),
        value(Literal::Now, kw("NOW")),
    )))(input)
}

fn literals(input: &str) -> IResult<&str, Vec<Literal>> {
    delimited(punct('('), separated_list0(punct(','), literal), punct(')'))(input)
}

fn usize_lit(input: &str) -> IResult<&str, usize> {
    map_res(ws(digit1), str::parse::<usize>)(input)
}

// =============================================================================
// DDL
// =============================================================================

fn column_type(input: &str) -> IResult<&str, ColumnType> {
    let (rest, name) = ident(input)?;
    let (rest, width) = opt(delimited(punct('('), usize_lit, punct(')')))(rest)?;
    let ty = match (name.to_ascii_lowercase().as_str(), width) {
        ("timestamp", None) => ColumnType::Timestamp,
        ("bool", None) => ColumnType::Bool,
        ("tinyint", None) => ColumnType::TinyInt,
        ("smallint", None) => ColumnType::SmallInt,
        ("int", None) => ColumnType::Int,
        ("bigint", None) => ColumnType::BigInt,
        ("float", None) => ColumnType::Float,
        ("double", None) => ColumnType::Double,
        ("binary", Some(n)) => ColumnType::Binary(n),
        ("nchar", Some(n)) => ColumnType::NChar(n),
        _ => {
            return Err(nom::Err::Failure(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Verify,
            )))
        }
    };
    Ok((rest, ty))
}

fn column_decls(input: &str) -> IResult<&str, Vec<ColumnDecl>> {
    delimited(
        punct('('),
        separated_list1(
            punct(','),
            map(pair(ident, column_type), |(name, ty)| ColumnDecl { name, ty }),
        ),
        punct(')'),
    )(input)
}

fn create_table(input: &str) -> IResult<&str, Statement> {
    let (rest, _) = pair(kw("CREATE"), kw("TABLE"))(input)?;
    let (rest, if_not_exists) = map(opt(tuple((kw("IF"), kw("NOT"), kw("EXISTS")))), |o| {
        o.is_some()
    })(rest)?;
    let (rest, name) = ident(rest)?;
    let table_name = name.clone();
    alt((
        map(
            preceded(kw("USING"), pair(ident, preceded(kw("TAGS"), literals))),
            move |(parent, tag_values)| Statement::CreateChild {
                name: name.clone(),
                if_not_exists,
                parent,
                tag_values,
            },
        ),
        map(
            pair(column_decls, opt(preceded(kw("TAGS"), column_decls))),
            move |(columns, tags)| Statement::CreateTable {
                name: table_name.clone(),
                if_not_exists,
                columns,
                tags: tags.unwrap_or_default(),
            },
        ),
    ))(rest)
}

fn drop_table(input: &str) -> IResult<&str, Statement> {
    map(
        tuple((
            kw("DROP"),
            kw("TABLE"),
            opt(pair(kw("IF"), kw("EXISTS"))),
            ident,
        )),
        |(_, _, if_exists, name)| Statement::DropTable {
            name,
            if_exists: if_exists.is_some(),
        },
    )(input)
}

// =============================================================================
// DML
// =============================================================================

fn insert_into(input: &str) -> IResult<&str, Statement> {
    map(
        tuple((
            kw("INSERT"),
            kw("INTO"),
            ident,
            opt(preceded(
                kw("USING"),
                pair(ident, preceded(kw("TAGS"), literals)),
            )),
            opt(paren_idents),
            kw("VALUES"),
            many1(literals),
        )),
        |(_, _, table, using, columns, _, rows)| Statement::Insert {
            table,
            using,
            columns,
            rows,
        },
    )(input)
}

fn select_item(input: &str) -> IResult<&str, SelectItem> {
    alt((
        value(
            SelectItem::CountAll,
            tuple((kw("COUNT"), punct('('), punct('*'), punct(')'))),
        ),
        map(
            preceded(kw("LAST"), delimited(punct('('), ident, punct(')'))),
            SelectItem::Last,
        ),
        map(ident, SelectItem::Column),
    ))(input)
}

fn projection(input: &str) -> IResult<&str, Vec<SelectItem>> {
    alt((
        value(Vec::new(), punct('*')),
        separated_list1(punct(','), select_item),
    ))(input)
}

fn cmp_op(input: &str) -> IResult<&str, CmpOp> {
    ws(alt((
        value(CmpOp::Le, tag("<=")),
        value(CmpOp::Ge, tag(">=")),
        value(CmpOp::Ne, tag("!=")),
        value(CmpOp::Ne, tag("<>")),
        value(CmpOp::Eq, tag("=")),
        value(CmpOp::Lt, tag("<")),
        value(CmpOp::Gt, tag(">")),
    )))(input)
}

fn term(input: &str) -> IResult<&str, Expr> {
    alt((
        delimited(punct('('), conjunction, punct(')')),
        map(
            pair(ident, preceded(kw("IN"), literals)),
            |(column, values)| Expr::In { column, values },
        ),
        map(tuple((ident, cmp_op, literal)), |(column, op, value)| {
            Expr::Compare { column, op, value }
        }),
    ))(input)
}

fn conjunction(input: &str) -> IResult<&str, Expr> {
    map(separated_list1(kw("AND"), term), |mut terms| {
        if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expr::And(terms)
        }
    })(input)
}

fn order_by(input: &str) -> IResult<&str, (String, bool)> {
    preceded(
        pair(kw("ORDER"), kw("BY")),
        pair(
            ident,
            map(opt(alt((kw("ASC"), kw("DESC")))), |dir| {
                dir.is_some_and(|d| d.eq_ignore_ascii_case("desc"))
            }),
        ),
    )(input)
}

fn select_from(input: &str) -> IResult<&str, Statement> {
    map(
        tuple((
            kw("SELECT"),
            projection,
            kw("FROM"),
            ident,
            opt(preceded(kw("WHERE"), conjunction)),
            opt(preceded(pair(kw("GROUP"), kw("BY")), idents)),
            opt(order_by),
            opt(pair(
                preceded(kw("LIMIT"), usize_lit),
                opt(preceded(kw("OFFSET"), usize_lit)),
            )),
        )),
        |(_, items, _, from, filter, group_by, order_by, limit)| {
            Statement::Select(Select {
                items,
                from,
                filter,
                group_by: group_by.unwrap_or_default(),
                order_by,
                limit: limit.map(|(n, _)| n),
                offset: limit.and_then(|(_, m)| m).unwrap_or(0),
            })
        },
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(sql: &str) -> Statement {
        parse_statement(sql).unwrap()
    }

    #[test]
    fn create_super_and_child() {
        let stmt = parse("CREATE TABLE IF NOT EXISTS st (ts timestamp, x binary(8)) TAGS (location nchar(16))");
        let Statement::CreateTable { name, if_not_exists, columns, tags } = stmt else {
            panic!("expected create");
        };
        assert_eq!(name, "st");
        assert!(if_not_exists);
        assert_eq!(columns[1].ty, ColumnType::Binary(8));
        assert_eq!(tags[0].ty, ColumnType::NChar(16));

        let stmt = parse("create table st_yyz using st tags ('yyz')");
        assert_eq!(
            stmt,
            Statement::CreateChild {
                name: "st_yyz".into(),
                if_not_exists: false,
                parent: "st".into(),
                tag_values: vec![Literal::Text("yyz".into())],
            }
        );
    }

    #[test]
    fn insert_with_using_and_many_rows() {
        let stmt = parse("INSERT INTO st_yyz USING st TAGS ('yyz')  (ts, x) VALUES (now,'a\\'b') (1, 'c')");
        let Statement::Insert { table, using, columns, rows } = stmt else {
            panic!("expected insert");
        };
        assert_eq!(table, "st_yyz");
        assert_eq!(using.unwrap().0, "st");
        assert_eq!(columns.unwrap(), vec!["ts", "x"]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec![Literal::Now, Literal::Text("a'b".into())]);
    }

    #[test]
    fn select_with_everything() {
        let stmt = parse(
            "SELECT LAST(id), x\nFROM t\nWHERE (x='a') AND (id IN (1,2)) AND (id>3)\nGROUP BY x\nORDER BY id DESC LIMIT 20 OFFSET 80",
        );
        let Statement::Select(s) = stmt else {
            panic!("expected select");
        };
        assert_eq!(
            s.items,
            vec![SelectItem::Last("id".into()), SelectItem::Column("x".into())]
        );
        assert!(matches!(s.filter, Some(Expr::And(ref terms)) if terms.len() == 3));
        assert_eq!(s.group_by, vec!["x"]);
        assert_eq!(s.order_by, Some(("id".into(), true)));
        assert_eq!(s.limit, Some(20));
        assert_eq!(s.offset, 80);
    }

    #[test]
    fn count_star_and_star() {
        let Statement::Select(s) = parse("SELECT COUNT(*) FROM\nt") else {
            panic!("expected select");
        };
        assert_eq!(s.items, vec![SelectItem::CountAll]);
        let Statement::Select(s) = parse("select * from t") else {
            panic!("expected select");
        };
        assert!(s.items.is_empty());
    }

    #[test]
    fn keywords_do_not_swallow_identifiers() {
        let Statement::Select(s) = parse("SELECT android FROM t WHERE index_no=1") else {
            panic!("expected select");
        };
        assert_eq!(s.items, vec![SelectItem::Column("android".into())]);
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            parse_statement("UPDATE t SET x=1"),
            Err(StoreError::Syntax { .. })
        ));
        assert!(parse_statement("CREATE TABLE t (id blob)").is_err());
    }
}
