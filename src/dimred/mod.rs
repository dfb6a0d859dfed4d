//! # Dimensionality Reduction
//!
//! Non-linear embeddings of high-dimensional data for visualisation.
//!
//! ## Currently Available
//! - **Symmetric SNE** ([`sne`]): stochastic neighbour embedding with a
//!   symmetric joint probability matrix, optimised by momentum gradient
//!   descent. A Student-t kernel can be selected for t-SNE style embeddings.
//!
//! ## Algorithm Selection Guide
//! - Use the **Gaussian** kernel to reproduce classic symmetric SNE
//! - Use the **Student-t** kernel when clusters crowd together in the embedding

pub mod sne;
