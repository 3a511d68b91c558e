use rayon::prelude::*;
use sift_core::mass::Loss;
use sift_core::scoring::{MatchedIon, Psm};

use crate::runner::Runner;

const PSM_HEADERS: [&str; 40] = [
    "filename",
    "query_idx",
    "db_idx",
    "feature_idx",
    "raw_idx",
    "sequence",
    "precursor",
    "charge",
    "expmass",
    "mz",
    "rt",
    "hits",
    "b_hits",
    "y_hits",
    "b_h2o_hits",
    "y_h2o_hits",
    "b_nh3_hits",
    "y_nh3_hits",
    "o_mass",
    "o_mass_ppm",
    "delta_m",
    "delta_m_ppm",
    "total_int",
    "matched_int",
    "matched_int_ratio",
    "int_ratio",
    "score",
    "decoy",
    "target",
    "psm_q",
    "precursor_q",
    "sequence_q",
    "protein_group_q",
    "protein_q",
    "protein",
    "protein_group",
    "protein_idx",
    "razor",
    "decoy_protein",
    "n_possible_proteins",
];

fn push_bool(record: &mut csv::ByteRecord, value: bool) {
    record.push_field(if value { b"1" } else { b"0" });
}

fn push_optional(record: &mut csv::ByteRecord, value: Option<usize>) {
    match value {
        Some(value) => record.push_field(itoa::Buffer::new().format(value).as_bytes()),
        None => record.push_field(b""),
    }
}

impl Runner {
    pub fn serialize_psm(&self, psm: &Psm, filenames: &[String]) -> csv::ByteRecord {
        let mut record = csv::ByteRecord::new();
        record.push_field(filenames[psm.file_id].as_bytes());
        record.push_field(itoa::Buffer::new().format(psm.query_idx).as_bytes());
        record.push_field(itoa::Buffer::new().format(psm.db_idx.0).as_bytes());
        push_optional(&mut record, psm.feature_idx);
        push_optional(&mut record, psm.raw_idx);
        record.push_field(psm.sequence.as_bytes());
        record.push_field(psm.precursor.as_bytes());
        record.push_field(itoa::Buffer::new().format(psm.charge).as_bytes());
        record.push_field(ryu::Buffer::new().format(psm.mass).as_bytes());
        record.push_field(ryu::Buffer::new().format(psm.mz).as_bytes());
        record.push_field(ryu::Buffer::new().format(psm.rt).as_bytes());
        record.push_field(itoa::Buffer::new().format(psm.hits).as_bytes());
        for loss in Loss::ALL {
            let counts = psm.hits_for(loss);
            record.push_field(itoa::Buffer::new().format(counts.b).as_bytes());
            record.push_field(itoa::Buffer::new().format(counts.y).as_bytes());
        }
        record.push_field(ryu::Buffer::new().format(psm.o_mass).as_bytes());
        record.push_field(ryu::Buffer::new().format(psm.o_mass_ppm).as_bytes());
        record.push_field(ryu::Buffer::new().format(psm.delta_m).as_bytes());
        record.push_field(ryu::Buffer::new().format(psm.delta_m_ppm).as_bytes());
        record.push_field(ryu::Buffer::new().format(psm.total_int).as_bytes());
        record.push_field(ryu::Buffer::new().format(psm.matched_int).as_bytes());
        record.push_field(
            ryu::Buffer::new()
                .format(psm.matched_int_ratio)
                .as_bytes(),
        );
        record.push_field(ryu::Buffer::new().format(psm.int_ratio).as_bytes());
        record.push_field(ryu::Buffer::new().format(psm.score).as_bytes());
        push_bool(&mut record, psm.decoy);
        push_bool(&mut record, !psm.decoy);
        record.push_field(ryu::Buffer::new().format(psm.q_values.psm).as_bytes());
        record.push_field(ryu::Buffer::new().format(psm.q_values.precursor).as_bytes());
        record.push_field(ryu::Buffer::new().format(psm.q_values.sequence).as_bytes());
        record.push_field(
            ryu::Buffer::new()
                .format(psm.q_values.protein_group)
                .as_bytes(),
        );
        record.push_field(ryu::Buffer::new().format(psm.q_values.protein).as_bytes());
        match &psm.protein {
            Some(annotation) => {
                record.push_field(annotation.protein.as_bytes());
                record.push_field(annotation.protein_group.as_bytes());
                record.push_field(annotation.protein_idx.as_bytes());
                push_bool(&mut record, annotation.razor);
                push_bool(&mut record, annotation.decoy_protein);
                record.push_field(
                    itoa::Buffer::new()
                        .format(annotation.n_possible_proteins)
                        .as_bytes(),
                );
            }
            None => {
                for _ in 0..6 {
                    record.push_field(b"");
                }
            }
        }
        record
    }

    pub fn write_psms(&self, psms: &[Psm], filenames: &[String]) -> anyhow::Result<String> {
        let path = self.make_path("results.sift.tsv");

        let mut wtr = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(vec![]);

        wtr.write_byte_record(&csv::ByteRecord::from(PSM_HEADERS.to_vec()))?;
        for record in psms
            .par_iter()
            .map(|psm| self.serialize_psm(psm, filenames))
            .collect::<Vec<_>>()
        {
            wtr.write_byte_record(&record)?;
        }

        wtr.flush()?;
        let bytes = wtr.into_inner()?;
        std::fs::write(&path, bytes)?;
        Ok(path.display().to_string())
    }

    fn serialize_ion(psm: &Psm, ion: &MatchedIon, filename: &str) -> csv::ByteRecord {
        let mut record = csv::ByteRecord::new();
        record.push_field(filename.as_bytes());
        record.push_field(itoa::Buffer::new().format(psm.query_idx).as_bytes());
        record.push_field(psm.sequence.as_bytes());
        record.push_field(ion.label().as_bytes());
        record.push_field(itoa::Buffer::new().format(ion.fragment_type).as_bytes());
        record.push_field(ion.loss.suffix().trim_start_matches('-').as_bytes());
        record.push_field(ryu::Buffer::new().format(ion.query_mass).as_bytes());
        record.push_field(ryu::Buffer::new().format(ion.db_mass).as_bytes());
        record.push_field(ryu::Buffer::new().format(ion.query_intensity).as_bytes());
        record.push_field(ryu::Buffer::new().format(ion.db_intensity).as_bytes());
        record.push_field(itoa::Buffer::new().format(ion.query_fragment_idx).as_bytes());
        record.push_field(itoa::Buffer::new().format(ion.db_fragment_idx).as_bytes());
        record
    }

    /// One row per matched fragment ion of every reported PSM
    pub fn write_matched_ions(&self, psms: &[Psm], filenames: &[String]) -> anyhow::Result<String> {
        let path = self.make_path("matched_ions.sift.tsv");

        let mut wtr = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(vec![]);
        let headers = csv::ByteRecord::from(vec![
            "filename",
            "query_idx",
            "sequence",
            "ion",
            "fragment_type",
            "loss",
            "query_mass",
            "db_mass",
            "query_intensity",
            "db_intensity",
            "query_fragment_idx",
            "db_fragment_idx",
        ]);
        wtr.write_byte_record(&headers)?;

        let records = psms
            .par_iter()
            .flat_map_iter(|psm| {
                psm.ions
                    .iter()
                    .map(move |ion| Self::serialize_ion(psm, ion, &filenames[psm.file_id]))
            })
            .collect::<Vec<csv::ByteRecord>>();
        for record in records {
            wtr.write_byte_record(&record)?;
        }

        wtr.flush()?;
        let bytes = wtr.into_inner()?;
        std::fs::write(&path, bytes)?;
        Ok(path.display().to_string())
    }
}
