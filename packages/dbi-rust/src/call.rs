//! Per-call request and response values.
//!
//! Entities hold only static configuration. Everything that varies per call
//! travels in a [`Call`] and comes back in a [`Reply`].

use taodbi_core::{Args, ControlNames, Filter, Row, Value};

/// Input of one action call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Call {
    /// Caller parameters, including control parameters such as `rowcount`.
    pub args: Args,
    /// Extra constraints. The first applies to this action; the resolver
    /// hands the rest down to child actions.
    pub extra: Vec<Filter>,
}

impl Call {
    #[must_use]
    pub fn new(args: Args) -> Self {
        Self {
            args,
            extra: Vec::new(),
        }
    }

    /// Appends an extra constraint.
    #[must_use]
    pub fn with_extra(mut self, filter: Filter) -> Self {
        self.extra.push(filter);
        self
    }

    /// The constraint that applies to this action.
    #[must_use]
    pub fn filter(&self) -> Option<&Filter> {
        self.extra.first()
    }

    /// The first extra constraint minus `field`, for use next to an
    /// identity predicate on that field.
    #[must_use]
    pub fn filter_without(&self, field: &str) -> Option<Filter> {
        self.filter().map(|f| {
            let mut f = f.clone();
            f.remove(field);
            f
        })
    }

    /// The single value of `name`, from the first extra constraint or else
    /// from args.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<Value> {
        self.filter()
            .and_then(|f| f.value(name).cloned())
            .or_else(|| self.args.get(name).cloned())
            .filter(Value::has_value)
    }

    /// All values of `name`: an `IN` list or array yields many, a scalar
    /// one. `None` when absent or empty.
    #[must_use]
    pub fn ids(&self, name: &str) -> Option<Vec<Value>> {
        let ids = match self.filter().and_then(|f| f.values(name)) {
            Some(values) => values,
            None => match self.args.get(name) {
                Some(Value::Array(items)) => items.clone(),
                Some(v) => vec![v.clone()],
                None => Vec::new(),
            },
        };
        let ids: Vec<Value> = ids.into_iter().filter(Value::has_value).collect();
        (!ids.is_empty()).then_some(ids)
    }

    /// The caller's `fields` allow-list, if any.
    #[must_use]
    pub fn fields(&self, controls: &ControlNames) -> Option<Vec<String>> {
        self.args.get(&controls.fields).and_then(Value::to_string_list)
    }

    /// Values for the columns in `pars`, taken from args, narrowed by the
    /// `fields` allow-list and overlaid with `=` values from the first extra
    /// constraint.
    #[must_use]
    pub fn field_values(&self, pars: &[String], controls: &ControlNames) -> Args {
        let fields = self.fields(controls);
        let mut out = Args::new();
        for par in pars {
            if fields.as_ref().is_some_and(|f| !f.contains(par)) {
                continue;
            }
            if let Some(v) = self.args.get(par) {
                out.insert(par.clone(), v.clone());
            }
        }
        if let Some(filter) = self.filter() {
            for par in pars {
                if let Some(v) = filter.value(par) {
                    out.insert(par.clone(), v.clone());
                }
            }
        }
        out
    }

    /// Integer control parameter; accepts numbers and numeric strings.
    #[must_use]
    pub fn int_arg(&self, name: &str) -> Option<i64> {
        int_value(self.args.get(name)?)
    }

    /// Whether a presence-flag parameter such as `sortreverse` is set.
    #[must_use]
    pub fn flag(&self, name: &str) -> bool {
        self.args.contains_key(name)
    }
}

pub(crate) fn int_value(value: &Value) -> Option<i64> {
    match value {
        Value::String(s) => s.trim().parse().ok(),
        other => other.as_i64(),
    }
}

/// Output of one action call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    pub rows: Vec<Row>,
    /// The call's args after the action: inserted keys and computed totals
    /// are added here so child actions can see them.
    pub args: Args,
    /// Key of the row written by an insert verb.
    pub last_id: Option<i64>,
    /// Set when an insert-or-fetch matched an existing record.
    pub updated: bool,
}

impl Reply {
    #[must_use]
    pub fn new(rows: Vec<Row>, args: Args) -> Self {
        Self {
            rows,
            args,
            last_id: None,
            updated: false,
        }
    }
}
