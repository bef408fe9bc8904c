pub mod count_matrix; // raw counts of genes x cells with names
pub mod mtx_dir; // 10x-style directory input/output
pub mod qc; // functions needed to perform quality control
pub mod simulate; // helper function for simulation
