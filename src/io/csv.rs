/*!
# Chain Persistence to CSV

Saves a sampled [`Chain`] to a CSV file and loads it back. Enable via the
`csv` feature. The file has one column per parameter (in recording order)
plus `logp` and `accepted`, and one row per step, so external tools can
consume a run directly.
*/

use std::error::Error;
use std::fs::File;
use std::path::Path;

use csv::{Reader, Writer};

use crate::chain::Chain;
use crate::model::DType;

/// Writes a chain to `path` as CSV, one row per recorded step.
pub fn save_chain<P: AsRef<Path>>(chain: &Chain, path: P) -> Result<(), Box<dyn Error>> {
    let mut wtr = Writer::from_writer(File::create(path)?);

    let mut header: Vec<String> = chain.names().to_vec();
    header.push("logp".to_string());
    header.push("accepted".to_string());
    wtr.write_record(&header)?;

    for i in 0..chain.len() {
        let mut row = Vec::with_capacity(chain.names().len() + 2);
        for name in chain.names() {
            let v = chain.values(name).map(|s| s[i]).unwrap_or_default();
            match chain.dtype(name) {
                Some(DType::I64) => row.push(format!("{}", v as i64)),
                _ => row.push(v.to_string()),
            }
        }
        row.push(chain.logp()[i].to_string());
        row.push(chain.accepted()[i].to_string());
        wtr.write_record(&row)?;
    }

    wtr.flush()?;
    Ok(())
}

/// Loads a chain previously written by [`save_chain`].
///
/// Parameter dtypes are not stored in the file; all series load as `f64`.
pub fn load_chain<P: AsRef<Path>>(path: P) -> Result<Chain, Box<dyn Error>> {
    let mut rdr = Reader::from_reader(File::open(path)?);
    let header: Vec<String> = rdr.headers()?.iter().map(|h| h.to_string()).collect();
    if header.len() < 2 {
        return Err("chain file must have logp and accepted columns".into());
    }
    let nparams = header.len() - 2;
    let names: Vec<String> = header[..nparams].to_vec();

    let mut rows: Vec<(Vec<f64>, f64, bool)> = Vec::new();
    for record in rdr.records() {
        let record = record?;
        let mut values = Vec::with_capacity(nparams);
        for field in record.iter().take(nparams) {
            values.push(field.parse::<f64>()?);
        }
        let logp: f64 = record
            .get(nparams)
            .ok_or("missing logp column")?
            .parse()?;
        let accepted: u8 = record
            .get(nparams + 1)
            .ok_or("missing accepted column")?
            .parse()?;
        rows.push((values, logp, accepted != 0));
    }

    let params = names.into_iter().map(|n| (n, DType::F64)).collect();
    let mut chain = Chain::preallocated(params, rows.len());
    for (i, (values, logp, accepted)) in rows.iter().enumerate() {
        chain.record(i, values, *logp, *accepted);
    }
    Ok(chain)
}
