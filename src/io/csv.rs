/*!
# Saving samples to CSV

Enable via the `csv` feature.
*/

use std::fs::File;
use std::path::Path;

use csv::Writer;
use ndarray::{Array2, Axis};

use crate::error::Result;

/**
Saves posterior samples, one per row, as a CSV file.

The header is `"sample"` followed by one column per dimension named `"dim_0"`, `"dim_1"`, etc.

```rust
use ndarray::arr2;
use sbi::io::csv::save_samples_csv;

let samples = arr2(&[[0.1, 0.2], [0.3, 0.4]]);
let file = tempfile::NamedTempFile::new()?;
save_samples_csv(&samples, file.path())?;
# Ok::<(), Box<dyn std::error::Error>>(())
```
*/
pub fn save_samples_csv<T: std::fmt::Display>(samples: &Array2<T>, path: impl AsRef<Path>) -> Result<()> {
    let mut wtr = Writer::from_writer(File::create(path)?);
    let mut header = vec!["sample".to_string()];
    header.extend((0..samples.ncols()).map(|i| format!("dim_{i}")));
    wtr.write_record(&header)?;

    for (i, sample) in samples.axis_iter(Axis(0)).enumerate() {
        let mut row = vec![i.to_string()];
        row.extend(sample.iter().map(|v| v.to_string()));
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    Ok(())
}
