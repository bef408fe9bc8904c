/// Centre or scale columns
pub trait MatOps {
    type Mat;
    type Scalar;

    /// Divide each column by its L2 norm (columns of norm zero are left as is)
    fn normalize_columns_inplace(&mut self);
    fn normalize_columns(&self) -> Self::Mat;

    /// Standardize each column to mean zero and unit sample
    /// variance; a column with zero variance becomes all zero
    fn scale_columns_inplace(&mut self);
    fn scale_columns(&self) -> Self::Mat;

    /// Subtract column means
    fn centre_columns_inplace(&mut self);
    fn centre_columns(&self) -> Self::Mat;
}

/// Operations to sample random matrices from an explicit seed.
/// `None` draws from OS entropy, so the result is not reproducible.
pub trait SampleOps {
    type Mat;

    /// Sample a matrix from a uniform distribution `U(0,1)`
    fn runif(dd: usize, nn: usize, seed: Option<u64>) -> Self::Mat;

    /// Sample a matrix from a normal distribution `N(0,1)`
    fn rnorm(dd: usize, nn: usize, seed: Option<u64>) -> Self::Mat;
}

/// Write matrices into delimited text files (gzipped if the name ends with `.gz`)
pub trait IoOps {
    /// * `file` - output file
    /// * `delim` - column delimiter
    /// * `row_names` - if given, written as the first column
    /// * `column_names` - if given, written as a header line
    fn write_file_delim(
        &self,
        file: &str,
        delim: &str,
        row_names: Option<&[Box<str>]>,
        column_names: Option<&[Box<str>]>,
    ) -> anyhow::Result<()>;

    fn to_tsv(&self, tsv_file: &str) -> anyhow::Result<()> {
        self.write_file_delim(tsv_file, "\t", None, None)
    }

    fn to_tsv_with_names(
        &self,
        tsv_file: &str,
        row_names: &[Box<str>],
        column_names: &[Box<str>],
    ) -> anyhow::Result<()> {
        self.write_file_delim(tsv_file, "\t", Some(row_names), Some(column_names))
    }
}
