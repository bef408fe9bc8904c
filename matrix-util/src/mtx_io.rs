use crate::common_io::*;
use std::io::{BufRead, Write};

/// Shape of a MatrixMarket coordinate file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MtxShape {
    pub nrow: usize,
    pub ncol: usize,
    pub nnz: usize,
}

/// Write the triplets into a MatrixMarket file with 1-based indices
/// * `triplets` - the triplets to write (0-based row, column, value)
/// * `nrow` - number of rows
/// * `ncol` - number of columns
/// * `mtx_file` - the output file (e.g., "matrix.mtx.gz")
pub fn write_mtx_triplets(
    triplets: &[(u64, u64, f32)],
    nrow: usize,
    ncol: usize,
    mtx_file: &str,
) -> anyhow::Result<()> {
    let mut buf = open_buf_writer(mtx_file)?;

    writeln!(buf, "%%MatrixMarket matrix coordinate integer general")?;
    writeln!(buf, "{}\t{}\t{}", nrow, ncol, triplets.len())?;

    for (row, col, val) in triplets {
        writeln!(buf, "{}\t{}\t{}", row + 1, col + 1, val)?;
    }

    buf.flush()?;
    Ok(())
}

/// Read a MatrixMarket coordinate file and return 0-based triplets
/// `(row, col, val)` sorted by column then row, together with the
/// declared shape
///
/// * `mtx_file` - path to the matrix market file (gzipped or not)
pub fn read_mtx_triplets(mtx_file: &str) -> anyhow::Result<(Vec<(u64, u64, f32)>, MtxShape)> {
    let buf = open_buf_reader(mtx_file)?;

    let mut shape: Option<MtxShape> = None;
    let mut triplets = vec![];

    for (line_no, line) in buf.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('%') {
            continue;
        }

        let words: Vec<&str> = line.split_whitespace().collect();
        if words.len() != 3 {
            return Err(anyhow::anyhow!(
                "{}:{}: expected three fields, found {}",
                mtx_file,
                line_no + 1,
                words.len()
            ));
        }

        match shape {
            None => {
                shape = Some(MtxShape {
                    nrow: words[0].parse()?,
                    ncol: words[1].parse()?,
                    nnz: words[2].parse()?,
                });
            }
            Some(s) => {
                let row = words[0].parse::<u64>()?;
                let col = words[1].parse::<u64>()?;
                let val = words[2].parse::<f32>()?;

                if row == 0 || col == 0 || row as usize > s.nrow || col as usize > s.ncol {
                    return Err(anyhow::anyhow!(
                        "{}:{}: entry ({}, {}) outside of {} x {}",
                        mtx_file,
                        line_no + 1,
                        row,
                        col,
                        s.nrow,
                        s.ncol
                    ));
                }
                // convert 1-based to 0-based
                triplets.push((row - 1, col - 1, val));
            }
        }
    }

    let shape = shape.ok_or(anyhow::anyhow!("failed to parse mtx header: {}", mtx_file))?;

    if triplets.len() != shape.nnz {
        log::warn!(
            "{}: header declares {} entries, found {}",
            mtx_file,
            shape.nnz,
            triplets.len()
        );
    }

    triplets.sort_by_key(|&(row, col, _)| (col, row));
    Ok((triplets, shape))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mtx_write_and_read_back() -> anyhow::Result<()> {
        let mtx_file = create_temp_dir_file("mtx.gz")?;
        let mtx_file = mtx_file.to_str().unwrap();

        let triplets = vec![(2, 0, 3.0), (0, 1, 1.0), (1, 1, 7.0)];
        write_mtx_triplets(&triplets, 3, 2, mtx_file)?;

        let (read_back, shape) = read_mtx_triplets(mtx_file)?;
        assert_eq!(
            shape,
            MtxShape {
                nrow: 3,
                ncol: 2,
                nnz: 3
            }
        );
        assert_eq!(read_back, vec![(2, 0, 3.0), (0, 1, 1.0), (1, 1, 7.0)]);

        remove_file(mtx_file)?;
        Ok(())
    }

    #[test]
    fn test_mtx_out_of_range_entry() -> anyhow::Result<()> {
        let mtx_file = create_temp_dir_file("mtx")?;
        let mtx_file = mtx_file.to_str().unwrap();

        let lines: Vec<Box<str>> = vec![
            "%%MatrixMarket matrix coordinate integer general".into(),
            "2 2 1".into(),
            "3 1 5".into(),
        ];
        write_lines(&lines, mtx_file)?;

        assert!(read_mtx_triplets(mtx_file).is_err());
        remove_file(mtx_file)?;
        Ok(())
    }
}
