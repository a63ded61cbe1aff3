pub mod job_run;
