use crate::common_io::write_lines;
use crate::traits::IoOps;
use nalgebra::DMatrix;

impl IoOps for DMatrix<f32> {
    fn write_file_delim(
        &self,
        file: &str,
        delim: &str,
        row_names: Option<&[Box<str>]>,
        column_names: Option<&[Box<str>]>,
    ) -> anyhow::Result<()> {
        if let Some(rows) = row_names {
            if rows.len() != self.nrows() {
                return Err(anyhow::anyhow!(
                    "{} row names for {} rows",
                    rows.len(),
                    self.nrows()
                ));
            }
        }

        let mut lines: Vec<Box<str>> = Vec::with_capacity(self.nrows() + 1);

        if let Some(cols) = column_names {
            if cols.len() != self.ncols() {
                return Err(anyhow::anyhow!(
                    "{} column names for {} columns",
                    cols.len(),
                    self.ncols()
                ));
            }
            let mut hdr: Vec<&str> = Vec::with_capacity(cols.len() + 1);
            if row_names.is_some() {
                hdr.push("name");
            }
            hdr.extend(cols.iter().map(|c| c.as_ref()));
            lines.push(hdr.join(delim).into_boxed_str());
        }

        // keep the row order; no parallel iterator here
        for (i, row) in self.row_iter().enumerate() {
            let values = row.iter().map(|x| format!("{}", x));
            let line = match row_names {
                Some(rows) => std::iter::once(rows[i].to_string())
                    .chain(values)
                    .collect::<Vec<_>>()
                    .join(delim),
                None => values.collect::<Vec<_>>().join(delim),
            };
            lines.push(line.into_boxed_str());
        }

        write_lines(&lines, file)
    }
}
