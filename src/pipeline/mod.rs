pub mod extraction; // Preprocess → Recognize → Extract → Validate
