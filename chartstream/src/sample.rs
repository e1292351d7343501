use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Unique identifier of one logical series within the incoming feed.
///
/// Marker series follow the `instrument:strategy:kind` convention, which the
/// [`MarkerConsolidator`](crate::marker::MarkerConsolidator) parses to derive
/// group keys. Every other series id is opaque.
#[derive(
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Debug,
    Deserialize,
    Serialize,
    derive_more::Display,
    derive_more::From,
)]
pub struct SeriesId(pub SmolStr);

impl SeriesId {
    pub fn new<S: Into<SmolStr>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SeriesId {
    fn from(value: &str) -> Self {
        Self(SmolStr::new(value))
    }
}

/// One payload field value - feeds deliver both numeric ordinates and
/// free-form text (eg. marker labels).
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Num(f64),
    Text(SmolStr),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Num(value) => Some(*value),
            FieldValue::Text(_) => None,
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Num(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(SmolStr::new(value))
    }
}

/// Key-value payload carried by a [`Sample`].
#[derive(Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct Payload(pub FnvHashMap<SmolStr, FieldValue>);

impl Payload {
    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.0.get(key)
    }

    fn num(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(FieldValue::as_f64)
    }

    /// Scalar ordinate for single-value series. Feeds are inconsistent about
    /// the field name, so fall back through the common aliases.
    pub fn value(&self) -> Option<f64> {
        self.num("value")
            .or_else(|| self.num("price"))
            .or_else(|| self.num("close"))
    }

    /// Full candlestick tuple, if all four fields are present.
    pub fn ohlc(&self) -> Option<(f64, f64, f64, f64)> {
        Some((
            self.num("open")?,
            self.num("high")?,
            self.num("low")?,
            self.num("close")?,
        ))
    }
}

impl<const N: usize> From<[(&str, FieldValue); N]> for Payload {
    fn from(fields: [(&str, FieldValue); N]) -> Self {
        Self(
            fields
                .into_iter()
                .map(|(key, value)| (SmolStr::new(key), value))
                .collect(),
        )
    }
}

/// One timestamped data point tagged with its logical series identifier.
///
/// Produced externally, consumed exactly once by the pipeline. Timestamps are
/// assumed non-decreasing within a series; violations are tolerated and the
/// arrival order is preserved as-is.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize, derive_more::Constructor)]
pub struct Sample {
    pub series: SeriesId,
    pub time_ms: u64,
    pub payload: Payload,
}

impl Sample {
    /// Convenience constructor for single-value samples.
    pub fn point<S: Into<SeriesId>>(series: S, time_ms: u64, value: f64) -> Self {
        Self {
            series: series.into(),
            time_ms,
            payload: Payload::from([("value", FieldValue::Num(value))]),
        }
    }

    /// Convenience constructor for candlestick samples.
    pub fn candle<S: Into<SeriesId>>(
        series: S,
        time_ms: u64,
        (open, high, low, close): (f64, f64, f64, f64),
    ) -> Self {
        Self {
            series: series.into(),
            time_ms,
            payload: Payload::from([
                ("open", FieldValue::Num(open)),
                ("high", FieldValue::Num(high)),
                ("low", FieldValue::Num(low)),
                ("close", FieldValue::Num(close)),
            ]),
        }
    }
}

/// Closed set of visual series kinds the pipeline routes to.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, Serialize,
    derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum SeriesKind {
    Line,
    Candle,
    Area,
    Marker,
}

impl SeriesKind {
    /// Candle series carry four ordinate columns, everything else one.
    pub fn is_ohlc(&self) -> bool {
        matches!(self, SeriesKind::Candle)
    }
}

/// Columnar append payload for one destination series.
///
/// The processor accumulates one `Batch` per distinct destination within a
/// chunk so the surface sees O(distinct series) append calls rather than one
/// call per sample.
#[derive(Clone, PartialEq, Debug, Serialize)]
pub enum Batch {
    Values {
        time_ms: Vec<u64>,
        value: Vec<f64>,
    },
    Candles {
        time_ms: Vec<u64>,
        open: Vec<f64>,
        high: Vec<f64>,
        low: Vec<f64>,
        close: Vec<f64>,
    },
}

impl Batch {
    pub fn empty(kind: SeriesKind) -> Self {
        if kind.is_ohlc() {
            Batch::Candles {
                time_ms: Vec::new(),
                open: Vec::new(),
                high: Vec::new(),
                low: Vec::new(),
                close: Vec::new(),
            }
        } else {
            Batch::Values {
                time_ms: Vec::new(),
                value: Vec::new(),
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Batch::Values { time_ms, .. } | Batch::Candles { time_ms, .. } => time_ms.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn times(&self) -> &[u64] {
        match self {
            Batch::Values { time_ms, .. } | Batch::Candles { time_ms, .. } => time_ms,
        }
    }

    /// Append one sample's ordinates, shaped for this batch's kind.
    ///
    /// Returns `false` (leaving the batch untouched) when the payload lacks
    /// the required fields - malformed samples are skipped, not errors.
    pub fn push_sample(&mut self, sample: &Sample) -> bool {
        match self {
            Batch::Values { time_ms, value } => match sample.payload.value() {
                Some(v) => {
                    time_ms.push(sample.time_ms);
                    value.push(v);
                    true
                }
                None => false,
            },
            Batch::Candles {
                time_ms,
                open,
                high,
                low,
                close,
            } => match sample.payload.ohlc() {
                Some((o, h, l, c)) => {
                    time_ms.push(sample.time_ms);
                    open.push(o);
                    high.push(h);
                    low.push(l);
                    close.push(c);
                    true
                }
                None => false,
            },
        }
    }
}
