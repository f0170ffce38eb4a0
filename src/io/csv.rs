/*!
# Saving Posterior Draws to CSV

Enable via the `csv` feature (on by default).
*/

use csv::Writer;
use std::fs::File;
use std::path::Path;

use crate::core::PosteriorSamples;
use crate::error::Result;

/**
Writes the retained draws as CSV to `writer`.

The output has:
- A header row with `"chain"`, `"draw"` and one column per parameter, named as in
  [`PosteriorSamples::param_names`].
- One row per retained draw, with the chain id and the draw's index within its chain.
*/
pub fn write_csv<W: std::io::Write>(samples: &PosteriorSamples, writer: W) -> Result<()> {
    let mut wtr = Writer::from_writer(writer);

    let mut header: Vec<String> = vec!["chain".to_string(), "draw".to_string()];
    header.extend(samples.param_names().iter().cloned());
    wtr.write_record(&header)?;

    let mut draw_idx = 0;
    let mut previous = None;
    for (row, &chain) in samples.draws().rows().into_iter().zip(samples.chain_ids()) {
        if previous != Some(chain) {
            draw_idx = 0;
            previous = Some(chain);
        }
        let mut record = vec![chain.to_string(), draw_idx.to_string()];
        record.extend(row.iter().map(|v| v.to_string()));
        wtr.write_record(&record)?;
        draw_idx += 1;
    }

    wtr.flush()?;
    Ok(())
}

/**
Saves the retained draws as a CSV file at `path`. See [`write_csv`] for the layout.

# Examples

```rust
use hier_mcmc::config::Config;
use hier_mcmc::core::Sampler;
use hier_mcmc::io::csv::save_csv;
use hier_mcmc::model::{ModelSpec, ObservationSet};

let obs = ObservationSet::from_records([("a", 1.0), ("a", 2.0), ("b", 4.0)]);
let model = ModelSpec::build(&obs, true)?;
let config = Config { chains: 2, iterations: 20, warmup: 10, ..Default::default() };
let samples = Sampler::new(&model, &config)?.run()?;

save_csv(&samples, "/tmp/hier_mcmc_draws.csv")?;
# Ok::<(), hier_mcmc::error::Error>(())
```
*/
pub fn save_csv<P: AsRef<Path>>(samples: &PosteriorSamples, path: P) -> Result<()> {
    write_csv(samples, File::create(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ChainReport, ChainStatus};
    use crate::gibbs::AcceptanceStats;
    use std::fs;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn report(chain: usize, retained: usize) -> ChainReport {
        ChainReport {
            chain,
            seed: 0,
            status: ChainStatus::Completed,
            iterations: retained,
            retained,
            acceptance: AcceptanceStats::default(),
            proposal_steps: vec![],
            elapsed: Duration::ZERO,
        }
    }

    fn samples(chains: Vec<ChainReport>, rows: Vec<Vec<f64>>) -> PosteriorSamples {
        PosteriorSamples::from_chains(
            vec!["mu[1]".into(), "mu0".into(), "tau".into(), "sigma".into()],
            vec!["a".into()],
            1,
            chains,
            rows,
        )
        .unwrap()
    }

    #[test]
    fn test_write_csv_multi_chain() {
        let samples = samples(
            vec![report(0, 2), report(1, 1)],
            vec![
                vec![1.0, 0.5, 2.0, 3.0, 1.5, 0.25, 2.5, 3.5],
                vec![-1.0, 0.0, 1.0, 4.0],
            ],
        );
        let mut buf = Vec::new();
        write_csv(&samples, &mut buf).unwrap();
        let expected = "\
chain,draw,mu[1],mu0,tau,sigma
0,0,1,0.5,2,3
0,1,1.5,0.25,2.5,3.5
1,0,-1,0,1,4
";
        assert_eq!(String::from_utf8(buf).unwrap(), expected);
    }

    #[test]
    fn test_skipped_chain_keeps_ids() {
        let samples = samples(
            vec![report(0, 0), report(1, 1)],
            vec![vec![], vec![7.0, 6.0, 5.0, 4.0]],
        );
        let mut buf = Vec::new();
        write_csv(&samples, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().nth(1), Some("1,0,7,6,5,4"));
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn test_save_csv_to_file() {
        let samples = samples(vec![report(0, 1)], vec![vec![42.0, 1.0, 2.0, 3.0]]);
        let file = NamedTempFile::new().expect("Could not create temp file");

        save_csv(&samples, file.path()).unwrap();

        let contents = fs::read_to_string(file.path()).unwrap();
        assert_eq!(contents.trim(), "chain,draw,mu[1],mu0,tau,sigma\n0,0,42,1,2,3");
    }
}
