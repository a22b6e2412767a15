//! PyO3 wrapper for the interval scheduler
//!
//! Exposes one market instance to Python. Configuration comes in as a JSON
//! document (same fields as `MarketConfig`); results and summaries go out as
//! plain dicts and lists.

use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyBool, PyDict, PyList, PyString};
use serde::Serialize;
use serde_json::Value;

use crate::models::{AgentId, LinkRelation, OrderId, OrderRequest, Side};
use crate::publisher::InboxRegistry;
use crate::scheduler::{IntervalScheduler, MarketConfig, SchedulerError};

/// Python wrapper for one market
///
/// # Example (from Python)
///
/// ```python
/// from market_clearing_core_rs import Market
///
/// market = Market('{"run_horizon_intervals": 1, "simulation_horizon": 2}')
/// first, last = market.open()
/// market.submit("LOAD", "demand", 100.0, 10.0, [first])
/// market.submit("PLANT", "supply", 60.0, 10.0, [first])
/// market.close()
/// market.clear()
/// summary = market.settle()
/// print(summary["intervals"][0]["clearing_price"])
/// market.advance()
/// print(market.drain_inbox("PLANT"))
/// ```
#[pyclass(name = "Market", unsendable)]
pub struct PyMarket {
    inner: IntervalScheduler,
    inbox: InboxRegistry,
}

fn scheduler_err(err: SchedulerError) -> PyErr {
    PyRuntimeError::new_err(err.to_string())
}

fn to_json<T: Serialize>(value: &T) -> PyResult<Value> {
    serde_json::to_value(value).map_err(|e| PyRuntimeError::new_err(e.to_string()))
}

/// Convert a JSON value into native Python objects
fn json_to_py(py: Python<'_>, value: &Value) -> PyResult<PyObject> {
    let object = match value {
        Value::Null => py.None(),
        Value::Bool(b) => PyBool::new(py, *b).to_owned().into_any().unbind(),
        Value::Number(n) => match n.as_i64() {
            Some(i) => i.into_pyobject(py)?.into_any().unbind(),
            None => n
                .as_f64()
                .unwrap_or(f64::NAN)
                .into_pyobject(py)?
                .into_any()
                .unbind(),
        },
        Value::String(s) => PyString::new(py, s).into_any().unbind(),
        Value::Array(items) => {
            let list = PyList::empty(py);
            for item in items {
                list.append(json_to_py(py, item)?)?;
            }
            list.into_any().unbind()
        }
        Value::Object(map) => {
            let dict = PyDict::new(py);
            for (key, item) in map {
                dict.set_item(key, json_to_py(py, item)?)?;
            }
            dict.into_any().unbind()
        }
    };
    Ok(object)
}

fn parse_side(side: &str) -> PyResult<Side> {
    match side.to_ascii_lowercase().as_str() {
        "supply" => Ok(Side::Supply),
        "demand" => Ok(Side::Demand),
        other => Err(PyValueError::new_err(format!(
            "side must be 'supply' or 'demand', got '{other}'"
        ))),
    }
}

fn parse_link(parent: Option<u64>, relation: Option<&str>) -> PyResult<Option<(OrderId, LinkRelation)>> {
    let Some(parent) = parent else {
        return match relation {
            Some(_) => Err(PyValueError::new_err("link_relation requires linked_order")),
            None => Ok(None),
        };
    };
    let relation = match relation {
        Some(name) => LinkRelation::parse(name).ok_or_else(|| {
            PyValueError::new_err(format!(
                "link_relation must be 'dependent' or 'mutually_exclusive', got '{name}'"
            ))
        })?,
        None => LinkRelation::Dependent,
    };
    Ok(Some((OrderId(parent), relation)))
}

#[pymethods]
impl PyMarket {
    /// Create a market from a JSON configuration (defaults when omitted)
    ///
    /// Raises ValueError if the configuration is malformed or invalid.
    #[new]
    #[pyo3(signature = (config_json = None))]
    fn new(config_json: Option<&str>) -> PyResult<Self> {
        let config = match config_json {
            Some(json) => {
                MarketConfig::from_json(json).map_err(|e| PyValueError::new_err(e.to_string()))?
            }
            None => MarketConfig::default(),
        };
        let mut inner =
            IntervalScheduler::new(config).map_err(|e| PyValueError::new_err(e.to_string()))?;
        let inbox = InboxRegistry::new();
        inner
            .add_sink(Box::new(inbox.clone()))
            .map_err(scheduler_err)?;
        Ok(Self { inner, inbox })
    }

    fn register_agent(&mut self, agent_id: &str) -> bool {
        self.inner.register_agent(agent_id)
    }

    /// Open the next run; returns `(first_interval, last_interval)`
    fn open(&mut self) -> PyResult<(usize, usize)> {
        let handle = self.inner.open().map_err(scheduler_err)?;
        let intervals = handle.intervals();
        Ok((intervals.start, intervals.end - 1))
    }

    /// Submit an order to the open run; returns the order ID
    ///
    /// A `min_acceptance_ratio` makes the order a block order. `linked_order`
    /// names an earlier order of the run; `link_relation` is "dependent"
    /// (default) or "mutually_exclusive".
    #[pyo3(signature = (agent_id, side, price_limit, volume, window, min_acceptance_ratio = None, exclusive_group = None, linked_order = None, link_relation = None))]
    #[allow(clippy::too_many_arguments)]
    fn submit(
        &self,
        agent_id: &str,
        side: &str,
        price_limit: f64,
        volume: f64,
        window: Vec<usize>,
        min_acceptance_ratio: Option<f64>,
        exclusive_group: Option<String>,
        linked_order: Option<u64>,
        link_relation: Option<&str>,
    ) -> PyResult<u64> {
        let handle = self
            .inner
            .handle()
            .ok_or_else(|| PyRuntimeError::new_err("no bidding window is open"))?;
        let side = parse_side(side)?;
        let link = parse_link(linked_order, link_relation)?;

        let mut request = match min_acceptance_ratio {
            Some(ratio) => OrderRequest::block(agent_id, side, price_limit, volume, window, ratio),
            None => OrderRequest::simple(agent_id, side, price_limit, volume, 0).with_window(window),
        };
        if let Some(group) = exclusive_group {
            request = request.with_exclusive_group(group.as_str());
        }
        if let Some((parent, relation)) = link {
            request = request.with_link(parent, relation);
        }

        handle
            .submit(request)
            .map(|id| id.0)
            .map_err(|e| PyValueError::new_err(e.to_string()))
    }

    fn close(&mut self) -> PyResult<()> {
        self.inner.close().map_err(scheduler_err)
    }

    /// Clear the closed book; returns the run status ("Cleared" or "Failed")
    fn clear(&mut self) -> PyResult<String> {
        let status = self.inner.clear().map_err(scheduler_err)?;
        Ok(format!("{status:?}"))
    }

    /// Settle and publish; returns the run summary as a dict
    fn settle(&mut self, py: Python<'_>) -> PyResult<PyObject> {
        let report = self.inner.settle().map_err(scheduler_err)?;
        json_to_py(py, &to_json(&report.summary)?)
    }

    fn advance(&mut self) -> PyResult<String> {
        let state = self.inner.advance().map_err(scheduler_err)?;
        Ok(state.to_string())
    }

    fn abort(&mut self) -> PyResult<String> {
        let state = self.inner.abort().map_err(scheduler_err)?;
        Ok(state.to_string())
    }

    fn stop(&mut self) -> PyResult<()> {
        self.inner.stop().map_err(scheduler_err)
    }

    fn state(&self) -> String {
        self.inner.state().to_string()
    }

    fn current_interval(&self) -> usize {
        self.inner.clock().current_interval()
    }

    /// Results of the most recently settled run, as a list of dicts
    fn last_results(&self, py: Python<'_>) -> PyResult<PyObject> {
        match self.inner.last_report() {
            Some(report) => json_to_py(py, &to_json(&report.results)?),
            None => Ok(PyList::empty(py).into_any().unbind()),
        }
    }

    /// Take the results delivered to an agent's inbox
    fn drain_inbox(&self, py: Python<'_>, agent_id: &str) -> PyResult<PyObject> {
        let results = self.inbox.drain(&AgentId::from(agent_id));
        json_to_py(py, &to_json(&results)?)
    }

    /// Summaries of all completed runs
    fn history(&self, py: Python<'_>) -> PyResult<PyObject> {
        json_to_py(py, &to_json(&self.inner.history())?)
    }

    /// All logged events as a list of dicts
    fn events(&self, py: Python<'_>) -> PyResult<PyObject> {
        json_to_py(py, &to_json(&self.inner.event_log().events())?)
    }
}
