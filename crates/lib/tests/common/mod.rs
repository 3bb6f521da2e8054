use std::sync::{Arc, Mutex};

use sqlmapper_lib_core::driver::{
    ColumnRef, Connection, Cursor, DbCell, DbValue, DriverError, DriverResult, Statement,
};
use sqlmapper_lib_core::types::JdbcType;

/// What the fake database answers for one executed statement.
#[derive(Clone)]
pub enum Outcome {
    Rows(Grid),
    Affected(u64),
    AffectedWithKeys(u64, Grid),
}

#[derive(Clone, Default)]
pub struct Grid {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<DbCell>>,
}

impl Grid {
    pub fn new(columns: &[&str], rows: Vec<Vec<DbCell>>) -> Self {
        Grid {
            columns: columns.iter().map(ToString::to_string).collect(),
            rows,
        }
    }
}

pub fn int(value: i64) -> DbCell {
    DbCell::new(DbValue::Int(value), JdbcType::Bigint)
}

pub fn text(value: &str) -> DbCell {
    DbCell::new(DbValue::Text(value.to_string()), JdbcType::Varchar)
}

pub fn null() -> DbCell {
    DbCell::new(DbValue::Null, JdbcType::Null)
}

pub type Handler = Arc<dyn Fn(&str, &[DbValue]) -> Outcome + Send + Sync>;

/// Everything the fake connection observed, for assertions.
#[derive(Default)]
pub struct Observations {
    pub executed: Vec<(String, Vec<DbValue>)>,
    pub commits: usize,
    pub rollbacks: usize,
}

pub type Log = Arc<Mutex<Observations>>;

pub struct FakeConnection {
    handler: Handler,
    log: Log,
}

impl FakeConnection {
    pub fn create(handler: Handler) -> (Box<dyn Connection>, Log) {
        let log: Log = Arc::default();
        (
            Box::new(FakeConnection {
                handler,
                log: log.clone(),
            }),
            log,
        )
    }

    /// A connection answering every query with the same grid.
    pub fn always(grid: Grid) -> (Box<dyn Connection>, Log) {
        Self::create(Arc::new(move |_, _| Outcome::Rows(grid.clone())))
    }
}

impl Connection for FakeConnection {
    fn prepare(&mut self, sql: &str) -> DriverResult<Box<dyn Statement>> {
        Ok(Box::new(FakeStatement {
            sql: sql.to_string(),
            handler: self.handler.clone(),
            log: self.log.clone(),
            binds: Vec::new(),
            keys: None,
        }))
    }

    fn commit(&mut self) -> DriverResult<()> {
        self.log.lock().unwrap().commits += 1;
        Ok(())
    }

    fn rollback(&mut self) -> DriverResult<()> {
        self.log.lock().unwrap().rollbacks += 1;
        Ok(())
    }
}

struct FakeStatement {
    sql: String,
    handler: Handler,
    log: Log,
    binds: Vec<(usize, DbValue)>,
    keys: Option<Grid>,
}

impl FakeStatement {
    fn ordered_binds(&self) -> Vec<DbValue> {
        let mut binds = self.binds.clone();
        binds.sort_by_key(|(ordinal, _)| *ordinal);
        binds.into_iter().map(|(_, value)| value).collect()
    }

    fn run(&mut self) -> Outcome {
        let binds = self.ordered_binds();
        self.log
            .lock()
            .unwrap()
            .executed
            .push((self.sql.clone(), binds.clone()));
        (self.handler)(&self.sql, &binds)
    }
}

impl Statement for FakeStatement {
    fn bind(&mut self, ordinal: usize, value: DbValue, _jdbc_type: JdbcType) -> DriverResult<()> {
        self.binds.push((ordinal, value));
        Ok(())
    }

    fn register_out(&mut self, _ordinal: usize, _jdbc_type: JdbcType) -> DriverResult<()> {
        Ok(())
    }

    fn execute_query(&mut self) -> DriverResult<Box<dyn Cursor>> {
        match self.run() {
            Outcome::Rows(grid) => Ok(Box::new(FakeCursor::new(grid))),
            _ => Err(DriverError::new("statement does not return rows")),
        }
    }

    fn execute_update(&mut self) -> DriverResult<u64> {
        match self.run() {
            Outcome::Affected(count) => Ok(count),
            Outcome::AffectedWithKeys(count, keys) => {
                self.keys = Some(keys);
                Ok(count)
            }
            Outcome::Rows(_) => Err(DriverError::new("statement returns rows")),
        }
    }

    fn generated_keys(&mut self) -> Option<Box<dyn Cursor>> {
        self.keys
            .take()
            .map(|grid| Box::new(FakeCursor::new(grid)) as Box<dyn Cursor>)
    }
}

pub struct FakeCursor {
    grid: Grid,
    position: Option<usize>,
}

impl FakeCursor {
    fn new(grid: Grid) -> Self {
        FakeCursor {
            grid,
            position: None,
        }
    }

    fn current(&self) -> DriverResult<&Vec<DbCell>> {
        self.position
            .and_then(|row| self.grid.rows.get(row))
            .ok_or_else(|| DriverError::new("cursor is not positioned on a row"))
    }
}

impl Cursor for FakeCursor {
    fn next(&mut self) -> DriverResult<bool> {
        let next = self.position.map_or(0, |p| p + 1);
        if next < self.grid.rows.len() {
            self.position = Some(next);
            Ok(true)
        } else {
            self.position = Some(self.grid.rows.len());
            Ok(false)
        }
    }

    fn columns(&self) -> &[String] {
        &self.grid.columns
    }

    fn cell(&self, column: ColumnRef<'_>) -> DriverResult<DbCell> {
        let row = self.current()?;
        let index = match column {
            ColumnRef::Ordinal(ordinal) => ordinal.checked_sub(1).ok_or_else(|| {
                DriverError::new("column ordinals are 1-based")
            })?,
            ColumnRef::Name(name) => self
                .grid
                .columns
                .iter()
                .position(|label| label.eq_ignore_ascii_case(name))
                .ok_or_else(|| DriverError::new(format!("unknown column '{name}'")))?,
        };
        row.get(index)
            .cloned()
            .ok_or_else(|| DriverError::new(format!("row has no column #{index}")))
    }
}
