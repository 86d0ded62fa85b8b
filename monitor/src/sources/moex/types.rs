use serde::Deserialize;
use serde_json::Value;

/// `iss.only=securities` reply: one column-oriented table.
#[derive(Debug, Deserialize)]
pub struct SecuritiesEnvelope {
    pub securities: Table,
}

#[derive(Debug, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub data: Vec<Vec<Value>>,
}

#[derive(Debug, PartialEq)]
pub enum PriceLookup {
    /// Last trade price, or the previous session's price when there was no trade.
    Price(f64),
    /// The board lists the security but reports no usable price.
    NoPrice,
    /// No row for the security.
    Missing,
}

impl Table {
    fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Finds the row for `secid` and reads `LAST`, falling back to `PREVPRICE`.
    pub fn price_of(&self, secid: &str) -> Result<PriceLookup, String> {
        let id_col = self.column("SECID").ok_or("missing SECID column")?;
        let last_col = self.column("LAST");
        let prev_col = self.column("PREVPRICE");
        if last_col.is_none() && prev_col.is_none() {
            return Err("neither LAST nor PREVPRICE column present".into());
        }

        let Some(row) = self
            .data
            .iter()
            .find(|row| row.get(id_col).and_then(Value::as_str) == Some(secid))
        else {
            return Ok(PriceLookup::Missing);
        };

        let positive = |col: Option<usize>| {
            col.and_then(|i| row.get(i))
                .and_then(Value::as_f64)
                .filter(|p| *p > 0.0)
        };

        Ok(match positive(last_col).or_else(|| positive(prev_col)) {
            Some(p) => PriceLookup::Price(p),
            None => PriceLookup::NoPrice,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(json: &str) -> Table {
        serde_json::from_str::<SecuritiesEnvelope>(json)
            .unwrap()
            .securities
    }

    #[test]
    fn last_is_preferred() {
        let t = table(
            r#"{"securities":{"columns":["SECID","LAST","PREVPRICE"],
                "data":[["SBER",301.5,299.0]]}}"#,
        );
        assert_eq!(t.price_of("SBER").unwrap(), PriceLookup::Price(301.5));
    }

    #[test]
    fn falls_back_to_prevprice() {
        let t = table(
            r#"{"securities":{"columns":["SECID","LAST","PREVPRICE"],
                "data":[["SRZ5",null,30412]]}}"#,
        );
        assert_eq!(t.price_of("SRZ5").unwrap(), PriceLookup::Price(30412.0));
    }

    #[test]
    fn no_row_is_missing() {
        let t = table(r#"{"securities":{"columns":["SECID","LAST","PREVPRICE"],"data":[]}}"#);
        assert_eq!(t.price_of("SBER").unwrap(), PriceLookup::Missing);
    }

    #[test]
    fn listed_without_price() {
        let t = table(
            r#"{"securities":{"columns":["SECID","LAST","PREVPRICE"],
                "data":[["OLD",null,0]]}}"#,
        );
        assert_eq!(t.price_of("OLD").unwrap(), PriceLookup::NoPrice);
    }

    #[test]
    fn missing_price_columns_is_an_error() {
        let t = table(r#"{"securities":{"columns":["SECID"],"data":[["SBER"]]}}"#);
        assert!(t.price_of("SBER").is_err());
    }
}
