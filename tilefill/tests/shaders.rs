use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::{AddressSpace, ShaderStage, StorageAccess};

use tilefill::device::BindingType;
use tilefill::{ProgramSources, Stage, MAX_WORKGROUPS_PER_DIM, PTCL_TILE_CAPACITY, WG_SIZE};

fn parse(stage: Stage) -> naga::Module {
    let sources = ProgramSources::default();
    let source = sources.get(stage);
    let module = naga::front::wgsl::parse_str(source)
        .unwrap_or_else(|e| panic!("{stage}: {}", e.emit_to_string(source)));
    Validator::new(ValidationFlags::all(), Capabilities::empty())
        .validate(&module)
        .unwrap_or_else(|e| panic!("{stage}: {e:?}"));
    module
}

#[test]
fn every_program_validates() {
    for stage in Stage::ALL {
        let module = parse(stage);
        assert_eq!(module.entry_points.len(), 1, "{stage}");
        let entry = &module.entry_points[0];
        assert_eq!(entry.name, "main");
        assert_eq!(entry.stage, ShaderStage::Compute);
        let expected = match stage {
            Stage::Fine => [16, 16, 1],
            _ => [WG_SIZE, 1, 1],
        };
        assert_eq!(entry.workgroup_size, expected, "{stage}");
    }
}

#[test]
fn programs_declare_their_binding_tables() {
    for stage in Stage::ALL {
        let module = parse(stage);
        let mut declared: Vec<_> = module
            .global_variables
            .iter()
            .filter_map(|(_, var)| {
                let binding = var.binding.as_ref()?;
                let ty = match var.space {
                    AddressSpace::Uniform => BindingType::Uniform,
                    AddressSpace::Storage { access } => BindingType::Storage {
                        read_only: !access.contains(StorageAccess::STORE),
                    },
                    other => panic!("{stage}: unexpected address space {other:?}"),
                };
                assert_eq!(binding.group, 0, "{stage}");
                Some((binding.binding, var.name.clone().unwrap_or_default(), ty))
            })
            .collect();
        declared.sort_by_key(|(binding, _, _)| *binding);

        let expected: Vec<_> = stage
            .bindings()
            .iter()
            .enumerate()
            .map(|(i, b)| (i as u32, b.buffer.name().to_string(), b.ty))
            .collect();
        assert_eq!(declared, expected, "{stage}");
    }
}

#[test]
fn programs_share_the_host_constants() {
    let sources = ProgramSources::default();
    for stage in [Stage::Coarse, Stage::Fine] {
        let line = format!("const PTCL_TILE_CAPACITY = {PTCL_TILE_CAPACITY}u;");
        assert!(sources.get(stage).contains(&line), "{stage}");
    }
    for stage in Stage::ALL.into_iter().filter(|s| *s != Stage::Fine) {
        let line = format!("const WG_SIZE = {WG_SIZE}u;");
        assert!(sources.get(stage).contains(&line), "{stage}");
    }
    let line = format!("const MAX_WORKGROUPS_PER_DIM = {MAX_WORKGROUPS_PER_DIM}u;");
    assert!(sources.get(Stage::Backdrop).contains(&line));
}
