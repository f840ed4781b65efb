//! Tabular views of bar history.

use polars::prelude::*;

use crate::domain::Bar;

/// Columns every bar frame carries, in order.
pub const BAR_COLUMNS: [&str; 6] = ["datetime", "open", "high", "low", "close", "volume"];

/// Render bars as a DataFrame indexed by bar close time.
pub fn bars_to_frame(bars: &[Bar]) -> PolarsResult<DataFrame> {
    let times: Vec<i64> = bars.iter().map(|b| b.close_time).collect();
    let opens: Vec<f64> = bars.iter().map(|b| b.open).collect();
    let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();

    DataFrame::new(vec![
        Column::new("datetime".into(), times)
            .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?,
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("volume".into(), volumes),
    ])
}

/// Parameters of a `get_price`/`get_bars` query.
///
/// `end_date`, `skip_paused` and `fq` are accepted for source compatibility
/// with research scripts; the engine only ever serves the snapshot it was
/// handed, so they never change the result.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceQuery {
    pub count: usize,
    pub end_date: Option<String>,
    pub frequency: Option<String>,
    /// Alias of `frequency` used by `get_bars`.
    pub unit: Option<String>,
    pub fields: Option<Vec<String>>,
    pub skip_paused: bool,
    pub fq: Option<String>,
}

impl Default for PriceQuery {
    fn default() -> Self {
        Self {
            count: 20,
            end_date: None,
            frequency: None,
            unit: None,
            fields: None,
            skip_paused: false,
            fq: Some("pre".to_string()),
        }
    }
}

impl PriceQuery {
    pub fn count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    pub fn frequency(mut self, frequency: impl Into<String>) -> Self {
        self.frequency = Some(frequency.into());
        self
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn end_date(mut self, end_date: impl Into<String>) -> Self {
        self.end_date = Some(end_date.into());
        self
    }

    pub fn skip_paused(mut self, skip: bool) -> Self {
        self.skip_paused = skip;
        self
    }

    pub fn fq(mut self, fq: Option<&str>) -> Self {
        self.fq = fq.map(str::to_string);
        self
    }

    /// Warnings for parameters that are accepted but have no effect.
    pub fn ignored_parameter_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if let Some(end) = &self.end_date {
            warnings.push(format!(
                "end_date '{end}' ignored: history always ends at the current bar"
            ));
        }
        if self.skip_paused {
            warnings.push("skip_paused ignored: snapshots contain only traded bars".to_string());
        }
        match self.fq.as_deref() {
            None | Some("pre") => {}
            Some(other) => warnings.push(format!(
                "fq '{other}' ignored: prices are served as delivered"
            )),
        }
        warnings
    }
}

/// Keep only `fields` (the datetime column is always kept). Unknown names
/// fall back to every column; the second value reports the unknown names.
pub fn select_fields(df: DataFrame, fields: Option<&[String]>) -> PolarsResult<(DataFrame, Vec<String>)> {
    let Some(fields) = fields.filter(|f| !f.is_empty()) else {
        return Ok((df, Vec::new()));
    };
    let unknown: Vec<String> = fields
        .iter()
        .filter(|f| !BAR_COLUMNS.contains(&f.as_str()))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        return Ok((df, unknown));
    }
    let mut selection = vec!["datetime".to_string()];
    selection.extend(fields.iter().filter(|f| f.as_str() != "datetime").cloned());
    Ok((df.select(selection)?, Vec::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bars(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let close = 100.0 + i as f64;
                Bar {
                    open_time: i as i64 * 60_000,
                    close_time: i as i64 * 60_000 + 59_999,
                    open: close - 0.5,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 10.0,
                }
            })
            .collect()
    }

    #[test]
    fn frame_has_bar_columns() {
        let df = bars_to_frame(&bars(3)).unwrap();
        assert_eq!(df.height(), 3);
        let names: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
        assert_eq!(names, BAR_COLUMNS.to_vec());
        let close = df.column("close").unwrap().f64().unwrap();
        assert_eq!(close.get(2), Some(102.0));
    }

    #[test]
    fn empty_history_is_empty_frame() {
        let df = bars_to_frame(&[]).unwrap();
        assert_eq!(df.height(), 0);
        assert_eq!(df.width(), 6);
    }

    #[test]
    fn select_known_fields() {
        let df = bars_to_frame(&bars(2)).unwrap();
        let fields = vec!["close".to_string()];
        let (df, unknown) = select_fields(df, Some(&fields)).unwrap();
        assert!(unknown.is_empty());
        assert_eq!(df.width(), 2);
    }

    #[test]
    fn unknown_fields_fall_back_to_all_columns() {
        let df = bars_to_frame(&bars(2)).unwrap();
        let fields = vec!["close".to_string(), "money".to_string()];
        let (df, unknown) = select_fields(df, Some(&fields)).unwrap();
        assert_eq!(unknown, vec!["money".to_string()]);
        assert_eq!(df.width(), 6);
    }

    #[test]
    fn ignored_parameters_warn() {
        let q = PriceQuery::default().end_date("2024-01-01").skip_paused(true).fq(Some("post"));
        assert_eq!(q.ignored_parameter_warnings().len(), 3);
        assert!(PriceQuery::default().ignored_parameter_warnings().is_empty());
    }
}
